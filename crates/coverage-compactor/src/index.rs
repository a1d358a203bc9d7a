//! Index of live samples that are old enough to consolidate.
//!
//! The builder walks the whole sample store with the store's continuation cursor and
//! buckets every eligible sample under its location hash (a fixed-length key prefix).
//! Samples younger than the minimum age are skipped: their batch may still be arriving.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use coverage_core::age::age_in_days;
use coverage_core::kv::{KvStore, ListedKey};

use crate::model::{SampleDescriptor, SampleMetadata};

/// Eligible samples grouped by location hash.
#[derive(Debug, Clone, Default)]
pub struct SampleIndex {
    /// Location hash to the samples that will be folded into that coverage entry.
    pub groups: HashMap<String, Vec<SampleDescriptor>>,
    /// Total eligible samples across all groups.
    pub eligible: u64,
    /// Keys skipped because their metadata could not be decoded.
    pub skipped_malformed: u64,
    /// True if listing stopped early because the store returned an error.
    pub truncated: bool,
}

impl SampleIndex {
    /// Number of distinct location hashes.
    #[must_use]
    pub fn hash_count(&self) -> usize {
        self.groups.len()
    }

    fn push(&mut self, hash: String, sample: SampleDescriptor) {
        self.eligible += 1;
        self.groups.entry(hash).or_default().push(sample);
    }
}

/// Returns the location hash for a sample key: its first `len` characters.
///
/// Keys shorter than `len` are their own hash.
#[must_use]
pub fn location_hash(key: &str, len: usize) -> &str {
    key.char_indices().nth(len).map_or(key, |(end, _)| &key[..end])
}

/// Builds a [`SampleIndex`] from the live sample store.
pub struct SampleIndexBuilder<'a> {
    store: &'a dyn KvStore,
    min_age_days: u32,
    hash_len: usize,
}

impl<'a> SampleIndexBuilder<'a> {
    /// Creates a builder over the given sample store.
    #[must_use]
    pub fn new(store: &'a dyn KvStore, min_age_days: u32, hash_len: usize) -> Self {
        Self {
            store,
            min_age_days,
            hash_len,
        }
    }

    /// Lists every page of the sample store and groups eligible samples.
    ///
    /// A listing failure never aborts the run: pagination stops, the index built so far
    /// is returned with `truncated` set, and unlisted samples stay live for the next run.
    pub async fn build(&self, now: DateTime<Utc>) -> SampleIndex {
        let mut index = SampleIndex::default();
        let mut cursor: Option<String> = None;
        let mut pages = 0_u64;

        loop {
            let page = match self.store.list(cursor.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        pages,
                        eligible = index.eligible,
                        "sample listing failed; consolidating what was indexed so far"
                    );
                    index.truncated = true;
                    break;
                }
            };
            pages += 1;

            for listed in page.keys {
                self.index_key(&mut index, listed, now);
            }

            match page.cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(
            pages,
            eligible = index.eligible,
            hashes = index.hash_count(),
            skipped_malformed = index.skipped_malformed,
            "sample index built"
        );

        index
    }

    fn index_key(&self, index: &mut SampleIndex, listed: ListedKey, now: DateTime<Utc>) {
        let metadata = match SampleMetadata::from_value(listed.metadata.as_ref()) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(
                    key = %listed.name,
                    error = %e,
                    "skipping sample with unreadable metadata"
                );
                index.skipped_malformed += 1;
                return;
            }
        };

        if age_in_days(metadata.time, now) < i64::from(self.min_age_days) {
            return;
        }

        let hash = location_hash(&listed.name, self.hash_len).to_string();
        index.push(hash, SampleDescriptor::new(listed.name, metadata));
    }
}
