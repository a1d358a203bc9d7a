//! Pre-built test fixtures for common consolidation scenarios.
//!
//! Provides helpers to seed samples and coverage entries with sensible defaults.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use coverage_core::age::days_before;
use coverage_core::kv::KvStore;
use serde_json::{Value, json};

use crate::storage::TracingKvStore;

/// Fixed "now" used by tests: 2023-11-14T22:13:20Z.
pub const FIXED_NOW_SECS: i64 = 1_700_000_000;

/// Returns the fixed test clock.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.timestamp_opt(FIXED_NOW_SECS, 0)
        .single()
        .expect("valid timestamp")
}

/// Timestamp `days` whole days before `now`.
pub fn days_ago(now: DateTime<Utc>, days: i64) -> i64 {
    days_before(now, days)
}

/// A live sample to seed into a sample store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFixture {
    /// Sample key. Its first characters form the location hash.
    pub key: String,
    /// Observation time in seconds.
    pub time: i64,
    /// Repeaters that relayed the sample.
    pub path: Vec<String>,
}

impl SampleFixture {
    /// A sample relayed by `path`.
    pub fn heard(key: impl Into<String>, time: i64, path: &[&str]) -> Self {
        Self {
            key: key.into(),
            time,
            path: path.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    /// A sample no repeater relayed.
    pub fn lost(key: impl Into<String>, time: i64) -> Self {
        Self {
            key: key.into(),
            time,
            path: Vec::new(),
        }
    }

    /// Metadata as written by the sample producer.
    pub fn metadata(&self) -> Value {
        json!({ "time": self.time, "path": self.path })
    }
}

/// Writes `samples` into `store` with empty values.
pub async fn seed_samples(store: &dyn KvStore, samples: &[SampleFixture]) {
    for sample in samples {
        store
            .put_with_metadata(&sample.key, Bytes::new(), sample.metadata())
            .await
            .expect("seed sample");
    }
}

/// Writes a coverage entry with raw `history` JSON and `metadata`.
pub async fn seed_coverage(store: &dyn KvStore, hash: &str, history: &Value, metadata: Value) {
    let value = serde_json::to_vec(history).expect("encode history");
    store
        .put_with_metadata(hash, Bytes::from(value), metadata)
        .await
        .expect("seed coverage");
}

/// Reads a coverage entry back as `(history, metadata)` JSON.
pub async fn read_coverage(store: &dyn KvStore, hash: &str) -> Option<(Value, Value)> {
    let entry = store.get_with_metadata(hash).await.expect("read coverage")?;
    let history = serde_json::from_slice(&entry.value).expect("history is JSON");
    Some((history, entry.metadata.unwrap_or(Value::Null)))
}

/// The three stores a consolidation run touches.
#[derive(Debug, Clone, Default)]
pub struct TestStores {
    /// Live samples.
    pub samples: Arc<TracingKvStore>,
    /// Coverage entries.
    pub coverage: Arc<TracingKvStore>,
    /// Archive tombstones.
    pub archive: Arc<TracingKvStore>,
}

impl TestStores {
    /// Creates three empty stores.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates stores whose sample listing returns at most `page_size` keys per page.
    pub fn with_sample_page_size(page_size: usize) -> Self {
        Self {
            samples: Arc::new(TracingKvStore::with_page_size(page_size)),
            ..Self::default()
        }
    }

    /// Creates stores whose coverage and archive operations each take `latency`, so
    /// concurrent merge and archive tasks overlap inside the store.
    pub fn with_store_latency(latency: Duration) -> Self {
        Self {
            coverage: Arc::new(TracingKvStore::with_latency(latency)),
            archive: Arc::new(TracingKvStore::with_latency(latency)),
            ..Self::default()
        }
    }

    /// Seeds live samples.
    pub async fn seed_samples(&self, samples: &[SampleFixture]) {
        seed_samples(self.samples.as_ref(), samples).await;
    }

    /// Clears recorded operations on all three stores.
    pub fn clear_operations(&self) {
        self.samples.clear_operations();
        self.coverage.clear_operations();
        self.archive.clear_operations();
    }
}
