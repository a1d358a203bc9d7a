//! # coverage-compactor
//!
//! Consolidates aged radio coverage samples into per-location coverage entries.
//!
//! A run walks three key-value namespaces:
//!
//! - **samples**: one live key per observation, metadata `{time, path}`
//! - **coverage**: one key per location hash, value is a bounded history of
//!   consolidation batches, metadata holds the derived statistics
//! - **archive**: tombstones of every consolidated sample
//!
//! ## Modules
//!
//! - [`index`]: lists live samples and groups the eligible ones by location hash
//! - [`merge`]: folds a group into its coverage entry behind a watermark
//! - [`archive`]: writes tombstones and deletes consolidated samples
//! - [`orchestrator`]: runs the three phases with bounded concurrency
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use coverage_compactor::{ConsolidateRequest, ConsolidationConfig, Consolidator};
//! use coverage_core::MemoryKvStore;
//!
//! let consolidator = Consolidator::new(
//!     Arc::new(MemoryKvStore::new()),
//!     Arc::new(MemoryKvStore::new()),
//!     Arc::new(MemoryKvStore::new()),
//!     ConsolidationConfig::default(),
//! );
//! let report = consolidator.consolidate(ConsolidateRequest::default()).await;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod archive;
pub mod config;
pub mod index;
pub mod merge;
pub mod metrics;
pub mod model;
pub mod orchestrator;

pub use archive::{ArchiveOutcome, ArchivePipeline, ArchiveTally};
pub use config::ConsolidationConfig;
pub use index::{SampleIndex, SampleIndexBuilder, location_hash};
pub use merge::{CoverageMerger, DEFAULT_MAX_HISTORY, MergeOutcome, MergeSummary};
pub use model::{
    CoverageMetadata, DecodedHistory, RecordShape, SampleDescriptor, SampleMetadata, UberSample,
    decode_history, encode_history,
};
pub use orchestrator::{ConsolidateRequest, ConsolidationReport, Consolidator};
