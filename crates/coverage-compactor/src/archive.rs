//! Archive-then-delete cleanup of consolidated samples.
//!
//! Each consolidated sample is first written to the archive store as a tombstone (empty
//! value, original `{time, path}` metadata) and only then deleted from the live store.
//!
//! | Archive put | Live delete | Result |
//! |-------------|-------------|--------|
//! | failed | not attempted | sample stays live, picked up next run |
//! | ok | failed | sample exists in both stores (surfaced, not resolved) |
//! | ok | ok | done |
//!
//! Nothing is retried and nothing is rolled back within a run.

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use coverage_core::kv::KvStore;

use crate::model::SampleDescriptor;

/// Outcome of archiving and deleting one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// Tombstone written and live sample deleted.
    Completed,
    /// Tombstone written but the live delete failed; the sample is now in both stores.
    DeleteFailed,
    /// Tombstone write failed; the delete was skipped and the sample stays live.
    ArchiveFailed,
}

/// Counters for a set of archive outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveTally {
    /// Tombstones written.
    pub archive_ok: u64,
    /// Tombstone writes that failed.
    pub archive_fail: u64,
    /// Live samples deleted.
    pub delete_ok: u64,
    /// Live deletes that failed after a successful archive.
    pub delete_fail: u64,
    /// Deletes not attempted because the archive failed.
    pub delete_skip: u64,
}

impl ArchiveTally {
    /// Counts one outcome.
    pub fn record(&mut self, outcome: ArchiveOutcome) {
        match outcome {
            ArchiveOutcome::Completed => {
                self.archive_ok += 1;
                self.delete_ok += 1;
            }
            ArchiveOutcome::DeleteFailed => {
                self.archive_ok += 1;
                self.delete_fail += 1;
            }
            ArchiveOutcome::ArchiveFailed => {
                self.archive_fail += 1;
                self.delete_skip += 1;
            }
        }
    }
}

impl FromIterator<ArchiveOutcome> for ArchiveTally {
    fn from_iter<I: IntoIterator<Item = ArchiveOutcome>>(iter: I) -> Self {
        let mut tally = Self::default();
        for outcome in iter {
            tally.record(outcome);
        }
        tally
    }
}

/// Moves consolidated samples from the live store into the archive store.
pub struct ArchivePipeline<'a> {
    archive: &'a dyn KvStore,
    samples: &'a dyn KvStore,
    concurrency: usize,
}

impl<'a> ArchivePipeline<'a> {
    /// Creates a pipeline writing tombstones to `archive` and deleting from `samples`,
    /// with at most `concurrency` samples in flight.
    #[must_use]
    pub fn new(archive: &'a dyn KvStore, samples: &'a dyn KvStore, concurrency: usize) -> Self {
        Self {
            archive,
            samples,
            concurrency: concurrency.max(1),
        }
    }

    /// Archives then deletes a single sample.
    pub async fn archive_one(&self, hash: &str, sample: &SampleDescriptor) -> ArchiveOutcome {
        let archived = self
            .archive
            .put_with_metadata(&sample.key, Bytes::new(), sample.tombstone_metadata())
            .await;

        if let Err(e) = archived {
            tracing::error!(
                hash,
                key = %sample.key,
                error = %e,
                "archive failed; sample left live"
            );
            return ArchiveOutcome::ArchiveFailed;
        }

        match self.samples.delete(&sample.key).await {
            Ok(()) => ArchiveOutcome::Completed,
            Err(e) => {
                tracing::warn!(
                    hash,
                    key = %sample.key,
                    error = %e,
                    "delete failed after archive; sample now present in both stores"
                );
                ArchiveOutcome::DeleteFailed
            }
        }
    }

    /// Archives then deletes every `(hash, sample)` pair of a batch.
    ///
    /// Samples are independent: each one is processed to completion whatever happens to
    /// the others, with at most `concurrency` in flight.
    pub async fn archive_and_delete<'s, I>(&self, batch: I) -> ArchiveTally
    where
        I: IntoIterator<Item = (&'s str, &'s SampleDescriptor)>,
    {
        let outcomes: Vec<ArchiveOutcome> = stream::iter(batch)
            .map(|(hash, sample)| self.archive_one(hash, sample))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        outcomes.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coverage_test_utils::{KvOp, OpKind, TracingKvStore};
    use serde_json::json;

    fn sample(key: &str, time: i64) -> SampleDescriptor {
        SampleDescriptor {
            key: key.to_string(),
            time,
            path: vec!["A".to_string()],
            stored_time: None,
        }
    }

    #[test]
    fn test_tally_records_each_outcome() {
        let tally: ArchiveTally = [
            ArchiveOutcome::Completed,
            ArchiveOutcome::Completed,
            ArchiveOutcome::DeleteFailed,
            ArchiveOutcome::ArchiveFailed,
        ]
        .into_iter()
        .collect();

        assert_eq!(
            tally,
            ArchiveTally {
                archive_ok: 3,
                archive_fail: 1,
                delete_ok: 2,
                delete_fail: 1,
                delete_skip: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_archive_and_delete_counts_each_outcome() {
        let archive = TracingKvStore::new();
        let samples = TracingKvStore::new();
        for key in ["abc123-ok", "abc123-nodel", "abc123-noarc"] {
            samples
                .put_with_metadata(key, Bytes::new(), json!({"time": 10, "path": ["A"]}))
                .await
                .unwrap();
        }
        archive.inject_failure(OpKind::Put, "abc123-noarc");
        samples.inject_failure(OpKind::Delete, "abc123-nodel");

        let batch = [
            sample("abc123-ok", 10),
            sample("abc123-nodel", 11),
            sample("abc123-noarc", 12),
        ];
        let pipeline = ArchivePipeline::new(&archive, &samples, 2);
        let tally = pipeline
            .archive_and_delete(batch.iter().map(|s| ("abc123", s)))
            .await;

        assert_eq!(
            tally,
            ArchiveTally {
                archive_ok: 2,
                archive_fail: 1,
                delete_ok: 1,
                delete_fail: 1,
                delete_skip: 1,
            }
        );

        assert_eq!(archive.keys(), vec!["abc123-nodel", "abc123-ok"]);
        assert_eq!(samples.keys(), vec!["abc123-noarc", "abc123-nodel"]);
        assert!(
            samples
                .operations_of(OpKind::Delete)
                .iter()
                .all(|op| !matches!(op, KvOp::Delete { key } if key == "abc123-noarc")),
            "delete is never attempted after a failed archive"
        );

        let tombstone = archive
            .get_with_metadata("abc123-ok")
            .await
            .unwrap()
            .unwrap();
        assert!(tombstone.value.is_empty());
        assert_eq!(tombstone.metadata, Some(json!({"time": 10, "path": ["A"]})));
    }
}
