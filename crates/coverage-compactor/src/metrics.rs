//! Consolidation metrics.
//!
//! Emitted through the `metrics` facade; the embedding process installs whatever
//! recorder/exporter it uses. Without a recorder these calls are no-ops.
//!
//! - Samples found eligible per run
//! - Merge, archive and delete outcomes per unit
//! - Run duration

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::archive::ArchiveTally;
use crate::orchestrator::ConsolidationReport;

// ============================================================================
// Metric Names
// ============================================================================

/// Samples old enough to consolidate.
pub const SAMPLES_ELIGIBLE: &str = "coverage_samples_eligible_total";

/// Coverage entry merges, labelled by `outcome` (`merged`, `unchanged`, `failed`).
pub const MERGE_TOTAL: &str = "coverage_merge_total";

/// Tombstone writes, labelled by `outcome` (`ok`, `failed`).
pub const ARCHIVE_TOTAL: &str = "coverage_archive_total";

/// Live sample deletes, labelled by `outcome` (`ok`, `failed`, `skipped`).
pub const DELETE_TOTAL: &str = "coverage_delete_total";

/// Consolidation run duration in seconds.
pub const CONSOLIDATION_DURATION: &str = "coverage_consolidation_duration_seconds";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all consolidation metric descriptions.
///
/// Call this once at application startup after installing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(SAMPLES_ELIGIBLE, "Samples old enough to be consolidated");
    describe_counter!(MERGE_TOTAL, "Coverage entry merges by outcome");
    describe_counter!(ARCHIVE_TOTAL, "Archive tombstone writes by outcome");
    describe_counter!(DELETE_TOTAL, "Live sample deletes by outcome");
    describe_histogram!(
        CONSOLIDATION_DURATION,
        "Duration of consolidation runs in seconds"
    );
}

// ============================================================================
// Metric Recording
// ============================================================================

/// Records one merge outcome.
pub fn record_merge(outcome: &'static str) {
    counter!(MERGE_TOTAL, "outcome" => outcome).increment(1);
}

/// Records archive and delete counters for a finished archive phase.
pub fn record_archive_tally(tally: &ArchiveTally) {
    counter!(ARCHIVE_TOTAL, "outcome" => "ok").increment(tally.archive_ok);
    counter!(ARCHIVE_TOTAL, "outcome" => "failed").increment(tally.archive_fail);
    counter!(DELETE_TOTAL, "outcome" => "ok").increment(tally.delete_ok);
    counter!(DELETE_TOTAL, "outcome" => "failed").increment(tally.delete_fail);
    counter!(DELETE_TOTAL, "outcome" => "skipped").increment(tally.delete_skip);
}

/// Timer for measuring a consolidation run.
pub struct ConsolidationTimer {
    start: Instant,
}

impl ConsolidationTimer {
    /// Starts timing a run.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Stops the timer and records run metrics.
    pub fn finish(self, report: &ConsolidationReport) {
        let duration = self.start.elapsed().as_secs_f64();
        histogram!(CONSOLIDATION_DURATION).record(duration);
        counter!(SAMPLES_ELIGIBLE).increment(report.samples_to_update);

        tracing::debug!(
            duration_secs = %duration,
            samples = report.samples_to_update,
            "recorded consolidation metrics"
        );
    }
}
