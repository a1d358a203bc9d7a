//! Folding a batch of samples into a coverage entry.
//!
//! # Process
//!
//! 1. Read the entry's history and statistics (empty defaults if absent)
//! 2. Fold samples newer than the watermark (`updated`) into one [`UberSample`]
//! 3. Stop if nothing was newer: re-merging a consolidated batch writes nothing
//! 4. Decode stored history, migrating legacy records
//! 5. Append the new aggregate and keep the newest `max_history` records
//! 6. Recompute statistics over retained history and advance the watermark
//! 7. Write history and statistics back as one put
//!
//! # Critical Invariants
//!
//! - **Bounded history**: at most `max_history` records after every merge
//! - **Monotonic watermark**: `updated` only moves forward, and samples at or below it
//!   are never counted twice
//! - **Monotonic repeaters**: `hitRepeaters` is a union that is never pruned, even when
//!   the record that introduced a repeater is evicted
//!
//! The write is a plain read-modify-write. Within one run every hash is merged by a
//! single task; two overlapping runs touching the same hash race and the later put wins.

use coverage_core::error::Result;
use coverage_core::kv::KvStore;
use coverage_core::observability::coverage_span;
use tracing::Instrument;

use crate::model::{
    CoverageMetadata, SampleDescriptor, UberSample, decode_history, encode_history,
};

/// Default number of consolidation batches retained per coverage entry.
pub const DEFAULT_MAX_HISTORY: usize = 15;

/// What a merge did to its coverage entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Every sample was at or below the watermark; nothing was written.
    Unchanged,
    /// A new aggregate was appended and the entry rewritten.
    Merged(MergeSummary),
}

/// Details of a merge that wrote a new aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    /// New watermark (time of the appended aggregate).
    pub updated: i64,
    /// Samples folded into the aggregate.
    pub contributed: u64,
    /// Records retained after bounding.
    pub retained: usize,
    /// Records evicted by the history bound.
    pub evicted: usize,
    /// Stored records migrated from the legacy shape.
    pub migrated: usize,
}

/// Folds samples newer than `watermark` into a single aggregate.
///
/// Returns `None` if no sample is newer than the watermark.
#[must_use]
pub fn fold_samples<'s>(
    samples: impl IntoIterator<Item = &'s SampleDescriptor>,
    watermark: i64,
) -> Option<UberSample> {
    let mut uber = UberSample::default();

    for sample in samples {
        if sample.time <= watermark {
            continue;
        }

        uber.time = uber.time.max(sample.time);

        if sample.is_heard() {
            uber.heard += 1;
            uber.last_heard = uber.last_heard.max(sample.time);
            for repeater in &sample.path {
                if !uber.repeaters.contains(repeater) {
                    uber.repeaters.push(repeater.clone());
                }
            }
        } else {
            uber.lost += 1;
        }
    }

    (uber.time != 0).then_some(uber)
}

/// Appends `uber` to `history`, bounds it, and recomputes entry statistics.
///
/// Returns the recomputed metadata and the number of evicted records.
pub fn apply_uber_sample(
    history: &mut Vec<UberSample>,
    uber: UberSample,
    previous: &CoverageMetadata,
    max_history: usize,
) -> (CoverageMetadata, usize) {
    let updated = uber.time;
    history.push(uber);

    let mut evicted = 0;
    if history.len() > max_history {
        history.sort_by_key(|record| record.time);
        evicted = history.len() - max_history;
        history.drain(..evicted);
    }

    let mut metadata = CoverageMetadata {
        updated,
        hit_repeaters: previous.hit_repeaters.clone(),
        ..CoverageMetadata::default()
    };
    for record in history.iter() {
        metadata.heard += record.heard;
        metadata.lost += record.lost;
        metadata.last_heard = metadata.last_heard.max(record.last_heard);
        metadata
            .hit_repeaters
            .extend(record.repeaters.iter().map(|r| r.to_lowercase()));
    }

    (metadata, evicted)
}

/// Merges sample batches into coverage entries.
pub struct CoverageMerger<'a> {
    store: &'a dyn KvStore,
    max_history: usize,
}

impl<'a> CoverageMerger<'a> {
    /// Creates a merger over the given coverage store.
    #[must_use]
    pub fn new(store: &'a dyn KvStore, max_history: usize) -> Self {
        Self {
            store,
            max_history: max_history.max(1),
        }
    }

    /// Folds `samples` into the coverage entry for `hash`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry cannot be read, decoded, encoded or written.
    /// Nothing is written on error.
    pub async fn merge(&self, hash: &str, samples: &[SampleDescriptor]) -> Result<MergeOutcome> {
        self.merge_inner(hash, samples)
            .instrument(coverage_span("merge", hash))
            .await
    }

    async fn merge_inner(&self, hash: &str, samples: &[SampleDescriptor]) -> Result<MergeOutcome> {
        let entry = self.store.get_with_metadata(hash).await?;
        let previous =
            CoverageMetadata::from_value(entry.as_ref().and_then(|e| e.metadata.as_ref()))?;

        let Some(uber) = fold_samples(samples, previous.updated) else {
            tracing::debug!(
                samples = samples.len(),
                watermark = previous.updated,
                "all samples already consolidated"
            );
            return Ok(MergeOutcome::Unchanged);
        };
        let contributed = uber.heard + uber.lost;

        let mut history = match &entry {
            Some(entry) => decode_history(&entry.value)?,
            None => Default::default(),
        };
        let migrated = history.migrated;

        let (metadata, evicted) =
            apply_uber_sample(&mut history.records, uber, &previous, self.max_history);

        let value = encode_history(&history.records)?;
        self.store
            .put_with_metadata(hash, value, metadata.to_value()?)
            .await?;

        let summary = MergeSummary {
            updated: metadata.updated,
            contributed,
            retained: history.records.len(),
            evicted,
            migrated,
        };
        tracing::debug!(
            updated = summary.updated,
            contributed = summary.contributed,
            retained = summary.retained,
            evicted = summary.evicted,
            migrated = summary.migrated,
            "coverage entry merged"
        );

        Ok(MergeOutcome::Merged(summary))
    }
}
