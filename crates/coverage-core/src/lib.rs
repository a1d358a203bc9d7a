//! # coverage-core
//!
//! Core abstractions for radio coverage consolidation.
//!
//! This crate provides the primitives shared by the compactor and its tests:
//!
//! - **Key-Value Store Contract**: the async [`KvStore`] trait and an in-memory store
//! - **Error Types**: shared error definitions and result types
//! - **Age Helpers**: whole-day sample age computation
//! - **Observability**: logging initialization and span constructors
//!
//! ## Example
//!
//! ```rust
//! use coverage_core::prelude::*;
//!
//! let store = MemoryKvStore::new();
//! assert!(store.is_empty().unwrap());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod age;
pub mod error;
pub mod kv;
pub mod observability;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use coverage_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::age::age_in_days;
    pub use crate::error::{Error, Result};
    pub use crate::kv::{KvEntry, KvStore, ListPage, ListedKey, MemoryKvStore};
}

pub use age::age_in_days;
pub use error::{Error, Result};
pub use kv::{KvEntry, KvStore, ListPage, ListedKey, MemoryKvStore};
pub use observability::{LogFormat, init_logging};
