//! Test key-value store with operation tracing.
//!
//! Provides an in-memory store that records all operations for test assertions and can
//! be told to fail specific operations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use coverage_core::error::{Error, Result};
use coverage_core::kv::{KvEntry, KvStore, ListPage, MemoryKvStore};
use serde_json::Value;

/// Record of a store operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    /// List operation.
    List {
        /// Cursor the page was requested from.
        cursor: Option<String>,
    },
    /// Get operation.
    Get {
        /// Key that was read.
        key: String,
    },
    /// Put operation.
    Put {
        /// Key that was written.
        key: String,
        /// Size of the value written.
        size: usize,
    },
    /// Delete operation.
    Delete {
        /// Key that was deleted.
        key: String,
    },
}

impl KvOp {
    /// Returns the kind of this operation.
    pub fn kind(&self) -> OpKind {
        match self {
            Self::List { .. } => OpKind::List,
            Self::Get { .. } => OpKind::Get,
            Self::Put { .. } => OpKind::Put,
            Self::Delete { .. } => OpKind::Delete,
        }
    }
}

/// Operation kinds, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// `list`
    List,
    /// `get_with_metadata`
    Get,
    /// `put_with_metadata`
    Put,
    /// `delete`
    Delete,
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    kind: OpKind,
    key_prefix: String,
}

/// In-memory key-value store with operation tracing.
///
/// Records every successful operation for later assertion in tests, and the highest
/// number of operations that were in flight at once. Clones share state.
#[derive(Debug, Clone)]
pub struct TracingKvStore {
    inner: Arc<MemoryKvStore>,
    operations: Arc<Mutex<Vec<KvOp>>>,
    failures: Arc<Mutex<Vec<InjectedFailure>>>,
    list_pages_before_failure: Arc<Mutex<Option<usize>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

/// Marks one operation as in flight until dropped.
struct InFlight<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for TracingKvStore {
    fn default() -> Self {
        Self::from_inner(MemoryKvStore::new(), None)
    }
}

impl TracingKvStore {
    /// Creates a new empty tracing store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that returns at most `page_size` keys per listing page.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self::from_inner(MemoryKvStore::with_page_size(page_size), None)
    }

    /// Creates a store with simulated latency on every operation.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self::from_inner(MemoryKvStore::new(), Some(latency))
    }

    fn from_inner(inner: MemoryKvStore, latency: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(inner),
            operations: Arc::default(),
            failures: Arc::default(),
            list_pages_before_failure: Arc::default(),
            in_flight: Arc::default(),
            peak_in_flight: Arc::default(),
            latency,
        }
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<KvOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns the recorded operations of one kind.
    #[must_use]
    pub fn operations_of(&self, kind: OpKind) -> Vec<KvOp> {
        self.operations()
            .into_iter()
            .filter(|op| op.kind() == kind)
            .collect()
    }

    /// Returns the highest number of operations that were in flight at the same time.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Returns how many successful puts targeted `key`.
    #[must_use]
    pub fn puts_for(&self, key: &str) -> usize {
        self.operations()
            .iter()
            .filter(|op| matches!(op, KvOp::Put { key: k, .. } if k == key))
            .count()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Injects a failure for operations of `kind` on keys starting with `key_prefix`.
    ///
    /// For [`OpKind::List`] the prefix is matched against the request cursor (empty for
    /// the first page), so an empty prefix fails every listing call.
    pub fn inject_failure(&self, kind: OpKind, key_prefix: impl Into<String>) {
        self.failures.lock().expect("lock").push(InjectedFailure {
            kind,
            key_prefix: key_prefix.into(),
        });
    }

    /// Makes every listing call fail once `pages` pages have been served.
    pub fn fail_listing_after(&self, pages: usize) {
        *self.list_pages_before_failure.lock().expect("lock") = Some(pages);
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().expect("lock").clear();
        *self.list_pages_before_failure.lock().expect("lock") = None;
    }

    /// Returns all stored keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.keys().expect("keys")
    }

    /// Returns true if `key` is stored.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys().iter().any(|k| k == key)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight {
            counter: &self.in_flight,
        }
    }

    fn record(&self, op: KvOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, kind: OpKind, key: &str) -> Result<()> {
        let failures = self.failures.lock().expect("lock");
        if failures
            .iter()
            .any(|f| f.kind == kind && key.starts_with(&f.key_prefix))
        {
            return Err(Error::storage(format!(
                "injected {kind:?} failure for key: {key}"
            )));
        }
        Ok(())
    }

    fn check_list_budget(&self) -> Result<()> {
        let mut budget = self.list_pages_before_failure.lock().expect("lock");
        match budget.as_mut() {
            Some(0) => Err(Error::storage("injected listing failure")),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn maybe_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait::async_trait]
impl KvStore for TracingKvStore {
    async fn list(&self, cursor: Option<&str>) -> Result<ListPage> {
        let _in_flight = self.enter();
        self.maybe_delay().await;
        self.check_failure(OpKind::List, cursor.unwrap_or_default())?;
        self.check_list_budget()?;
        self.record(KvOp::List {
            cursor: cursor.map(str::to_string),
        });

        self.inner.list(cursor).await
    }

    async fn get_with_metadata(&self, key: &str) -> Result<Option<KvEntry>> {
        let _in_flight = self.enter();
        self.maybe_delay().await;
        self.check_failure(OpKind::Get, key)?;
        self.record(KvOp::Get {
            key: key.to_string(),
        });

        self.inner.get_with_metadata(key).await
    }

    async fn put_with_metadata(&self, key: &str, value: Bytes, metadata: Value) -> Result<()> {
        let _in_flight = self.enter();
        self.maybe_delay().await;
        self.check_failure(OpKind::Put, key)?;
        self.record(KvOp::Put {
            key: key.to_string(),
            size: value.len(),
        });

        self.inner.put_with_metadata(key, value, metadata).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _in_flight = self.enter();
        self.maybe_delay().await;
        self.check_failure(OpKind::Delete, key)?;
        self.record(KvOp::Delete {
            key: key.to_string(),
        });

        self.inner.delete(key).await
    }
}
