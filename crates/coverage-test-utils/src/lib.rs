//! Shared test utilities for coverage consolidation tests.
//!
//! This crate provides:
//! - [`TracingKvStore`]: In-memory key-value store with operation recording and
//!   failure injection
//! - [`TestStores`]: The sample, coverage and archive stores of one test
//! - Fixture helpers for seeding samples and coverage entries
//!
//! # Example
//!
//! ```rust,ignore
//! use coverage_test_utils::{SampleFixture, TestStores, days_ago, fixed_now};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let stores = TestStores::new();
//!     let now = fixed_now();
//!     stores
//!         .seed_samples(&[SampleFixture::heard("abc123-1", days_ago(now, 2), &["R1"])])
//!         .await;
//!     // ... run consolidation ...
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod storage;

pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("coverage=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
