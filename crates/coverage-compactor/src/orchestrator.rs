//! One consolidation run: index, merge, then archive.
//!
//! # Architecture
//!
//! ```text
//! Consolidator::consolidate
//!     │
//!     ├── Index: list every sample page, keep samples >= max_age days old,
//!     │          group by location hash
//!     │
//!     ├── Merge: one task per hash (bounded by merge_concurrency)
//!     │          fold the batch into the hash's coverage entry
//!     │
//!     ├── Archive: one task per sample of every successfully merged hash
//!     │            (bounded by archive_concurrency): tombstone, then delete
//!     │
//!     └── Reduce per-task results into a ConsolidationReport
//! ```
//!
//! # Critical Invariants
//!
//! - **Unit isolation**: a failed merge or archive never aborts the others
//! - **No loss**: samples of a hash whose merge failed are never archived or deleted
//! - **Reduced counters**: totals are folded from collected per-task results
//! - **Safe re-runs**: re-processing consolidated samples is a no-op merge (watermark),
//!   and their archive/delete is simply repeated

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use ulid::Ulid;

use coverage_core::error::Result;
use coverage_core::kv::KvStore;
use coverage_core::observability::consolidation_span;

use crate::archive::{ArchivePipeline, ArchiveTally};
use crate::config::ConsolidationConfig;
use crate::index::SampleIndexBuilder;
use crate::merge::{CoverageMerger, MergeOutcome};
use crate::metrics::{self, ConsolidationTimer};

/// Parameters of one consolidation trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidateRequest {
    /// Minimum sample age in whole days. Falls back to the configured default.
    #[serde(rename = "maxAge", default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u32>,
}

/// Counters returned for one consolidation run.
///
/// Field names are the response contract of the trigger and must not change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidationReport {
    /// Distinct location hashes with eligible samples.
    pub coverage_entites_to_update: u64,
    /// Samples old enough to consolidate.
    pub samples_to_update: u64,
    /// Hashes whose merge completed (including no-op merges).
    pub merged_ok: u64,
    /// Hashes whose merge failed; their samples stay live.
    pub merged_fail: u64,
    /// Tombstones written.
    pub archive_ok: u64,
    /// Tombstone writes that failed.
    pub archive_fail: u64,
    /// Live samples deleted.
    pub delete_ok: u64,
    /// Live deletes that failed after a successful archive.
    pub delete_fail: u64,
    /// Deletes skipped because the archive failed.
    pub delete_skip: u64,
    /// Sample listing stopped early; some samples were not considered this run.
    #[serde(skip)]
    pub listing_truncated: bool,
}

impl ConsolidationReport {
    fn apply_archive_tally(&mut self, tally: ArchiveTally) {
        self.archive_ok += tally.archive_ok;
        self.archive_fail += tally.archive_fail;
        self.delete_ok += tally.delete_ok;
        self.delete_fail += tally.delete_fail;
        self.delete_skip += tally.delete_skip;
    }
}

/// Runs consolidation over the sample, coverage and archive stores.
///
/// # Example
///
/// ```rust,ignore
/// use coverage_compactor::{Consolidator, ConsolidateRequest, ConsolidationConfig};
///
/// let config = ConsolidationConfig::default();
/// let consolidator = Consolidator::new(samples, coverage, archive, config);
/// let report = consolidator.consolidate(ConsolidateRequest { max_age: Some(2) }).await;
/// println!("{}", serde_json::to_string(&report)?);
/// ```
pub struct Consolidator {
    samples: Arc<dyn KvStore>,
    coverage: Arc<dyn KvStore>,
    archive: Arc<dyn KvStore>,
    config: ConsolidationConfig,
}

impl Consolidator {
    /// Creates a consolidator over the three stores.
    ///
    /// Zero limits in `config` are raised to 1, so a run is never unbounded and the
    /// location hash is never empty.
    #[must_use]
    pub fn new(
        samples: Arc<dyn KvStore>,
        coverage: Arc<dyn KvStore>,
        archive: Arc<dyn KvStore>,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            samples,
            coverage,
            archive,
            config: config.clamped(),
        }
    }

    /// Runs one consolidation pass as of now.
    pub async fn consolidate(&self, request: ConsolidateRequest) -> ConsolidationReport {
        let max_age_days = request
            .max_age
            .unwrap_or(self.config.default_max_age_days);
        self.consolidate_at(max_age_days, Utc::now()).await
    }

    /// Runs one consolidation pass treating `now` as the current time.
    pub async fn consolidate_at(
        &self,
        max_age_days: u32,
        now: DateTime<Utc>,
    ) -> ConsolidationReport {
        let run_id = Ulid::new().to_string();
        self.run(max_age_days, now)
            .instrument(consolidation_span(&run_id, max_age_days))
            .await
    }

    async fn run(&self, max_age_days: u32, now: DateTime<Utc>) -> ConsolidationReport {
        let timer = ConsolidationTimer::start();

        let index = SampleIndexBuilder::new(
            self.samples.as_ref(),
            max_age_days,
            self.config.location_hash_len,
        )
        .build(now)
        .await;

        let mut report = ConsolidationReport {
            coverage_entites_to_update: index.hash_count() as u64,
            samples_to_update: index.eligible,
            listing_truncated: index.truncated,
            ..ConsolidationReport::default()
        };

        tracing::info!(
            hashes = report.coverage_entites_to_update,
            samples = report.samples_to_update,
            listing_truncated = report.listing_truncated,
            metric = "coverage_index_built",
            "starting coverage consolidation"
        );

        // Merge phase: one task per hash.
        let merger = CoverageMerger::new(self.coverage.as_ref(), self.config.max_history);
        let merge_results: Vec<(&String, Result<MergeOutcome>)> = stream::iter(&index.groups)
            .map(|(hash, samples)| {
                let merger = &merger;
                async move { (hash, merger.merge(hash, samples).await) }
            })
            .buffer_unordered(self.config.merge_concurrency)
            .collect()
            .await;

        let mut merged_hashes = Vec::with_capacity(merge_results.len());
        for (hash, result) in merge_results {
            match result {
                Ok(outcome) => {
                    report.merged_ok += 1;
                    metrics::record_merge(match outcome {
                        MergeOutcome::Merged(_) => "merged",
                        MergeOutcome::Unchanged => "unchanged",
                    });
                    merged_hashes.push(hash);
                }
                Err(e) => {
                    report.merged_fail += 1;
                    metrics::record_merge("failed");
                    tracing::error!(
                        hash = %hash,
                        error = %e,
                        metric = "coverage_merge_errors_total",
                        "merge failed; samples left live for the next run"
                    );
                }
            }
        }

        // Archive phase: one task per sample of every merged hash.
        let pipeline = ArchivePipeline::new(
            self.archive.as_ref(),
            self.samples.as_ref(),
            self.config.archive_concurrency,
        );
        let batch = merged_hashes
            .into_iter()
            .filter_map(|hash| index.groups.get_key_value(hash))
            .flat_map(|(hash, samples)| {
                samples
                    .iter()
                    .map(move |sample| (hash.as_str(), sample))
            });
        let tally = pipeline.archive_and_delete(batch).await;
        metrics::record_archive_tally(&tally);
        report.apply_archive_tally(tally);

        tracing::info!(
            merged_ok = report.merged_ok,
            merged_fail = report.merged_fail,
            archive_ok = report.archive_ok,
            archive_fail = report.archive_fail,
            delete_ok = report.delete_ok,
            delete_fail = report.delete_fail,
            delete_skip = report.delete_skip,
            metric = "coverage_consolidation_completed",
            "coverage consolidation completed"
        );

        timer.finish(&report);
        report
    }
}
