//! Key-value store contract shared by the sample, coverage and archive stores.
//!
//! The stores are eventually-consistent key-value namespaces where every key carries an
//! opaque value plus a small JSON metadata blob. The consolidation engine only needs:
//! - cursor-paginated listing that returns each key's metadata
//! - get and put of value + metadata as a single unit
//! - idempotent delete
//!
//! ## Metadata
//!
//! Metadata is carried as `serde_json::Value`. Typed views (sample metadata,
//! coverage statistics) are decoded by the callers that own those shapes, so older
//! records written by previous releases can still be listed and inspected.
//!
//! ## Consistency
//!
//! `put_with_metadata` replaces value and metadata together. There is no conditional
//! write: callers that read-modify-write an entry race with any concurrent writer of
//! the same key and the later write wins.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Default number of keys returned per listing page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// A key returned by a listing call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListedKey {
    /// Key name.
    pub name: String,
    /// Metadata stored alongside the key, if any.
    pub metadata: Option<Value>,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    /// Keys on this page.
    pub keys: Vec<ListedKey>,
    /// Opaque continuation token. `None` means the listing is complete.
    pub cursor: Option<String>,
}

/// A stored value together with its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    /// Raw value bytes.
    pub value: Bytes,
    /// Metadata stored alongside the value, if any.
    pub metadata: Option<Value>,
}

/// Key-value store trait.
///
/// All stores (sample, coverage, archive) implement this trait.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Lists one page of keys starting after `cursor`.
    ///
    /// Pass `None` to start from the beginning. The returned page's `cursor` is `None`
    /// once there are no further keys.
    ///
    /// **Ordering**: callers must not rely on any ordering across or within pages.
    async fn list(&self, cursor: Option<&str>) -> Result<ListPage>;

    /// Reads a value and its metadata.
    ///
    /// Returns `None` if the key doesn't exist.
    async fn get_with_metadata(&self, key: &str) -> Result<Option<KvEntry>>;

    /// Writes a value and its metadata as one unit, replacing any previous entry.
    async fn put_with_metadata(&self, key: &str, value: Bytes, metadata: Value) -> Result<()>;

    /// Deletes a key.
    ///
    /// Succeeds even if the key doesn't exist (idempotent).
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory key-value store.
///
/// Thread-safe via `RwLock`. Keys are kept ordered so that listing is deterministic and
/// the continuation cursor can simply be the last key of the previous page.
#[derive(Debug)]
pub struct MemoryKvStore {
    entries: Arc<RwLock<BTreeMap<String, KvEntry>>>,
    page_size: usize,
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl MemoryKvStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty store that returns at most `page_size` keys per page.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            entries: Arc::default(),
            page_size: page_size.max(1),
        }
    }

    /// Returns the number of stored keys.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Returns true if the store holds no keys.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    /// Returns all stored keys in order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the lock is poisoned.
    pub fn keys(&self) -> Result<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, KvEntry>>> {
        self.entries.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, KvEntry>>> {
        self.entries.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn list(&self, cursor: Option<&str>) -> Result<ListPage> {
        let entries = self.read()?;
        let lower = cursor.map_or(Bound::Unbounded, |c| Bound::Excluded(c.to_string()));

        let mut iter = entries.range((lower, Bound::Unbounded));
        let keys: Vec<ListedKey> = iter
            .by_ref()
            .take(self.page_size)
            .map(|(name, entry)| ListedKey {
                name: name.clone(),
                metadata: entry.metadata.clone(),
            })
            .collect();

        let cursor = if iter.next().is_some() {
            keys.last().map(|k| k.name.clone())
        } else {
            None
        };

        Ok(ListPage { keys, cursor })
    }

    async fn get_with_metadata(&self, key: &str) -> Result<Option<KvEntry>> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn put_with_metadata(&self, key: &str, value: Bytes, metadata: Value) -> Result<()> {
        self.write()?.insert(
            key.to_string(),
            KvEntry {
                value,
                metadata: Some(metadata),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.write()?.remove(key);
        Ok(())
    }
}
