//! Observability infrastructure for coverage consolidation.
//!
//! Structured logging with consistent spans. Every consolidation run is wrapped in a
//! `consolidation` span so per-hash and per-sample events can be correlated.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `coverage_compactor=debug`)
///
/// # Example
///
/// ```rust
/// use coverage_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .try_init();
            }
            LogFormat::Pretty => {
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .try_init();
            }
        }
    });
}

/// Creates the span that wraps one consolidation run.
///
/// # Example
///
/// ```rust
/// use coverage_core::observability::consolidation_span;
///
/// let span = consolidation_span("01HX0000000000000000000001", 1);
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn consolidation_span(run_id: &str, max_age_days: u32) -> Span {
    tracing::info_span!("consolidation", run_id = run_id, max_age_days = max_age_days)
}

/// Creates a span for work on a single coverage entry.
#[must_use]
pub fn coverage_span(operation: &str, hash: &str) -> Span {
    tracing::debug_span!("coverage", op = operation, hash = hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json); // Second call should be no-op
    }

    #[test]
    fn test_consolidation_span_creates_span() {
        let span = consolidation_span("run_123", 1);
        let _guard = span.enter();
        tracing::info!("message in consolidation span");
    }

    #[test]
    fn test_coverage_span_creates_span() {
        let span = coverage_span("merge", "abc123");
        let _guard = span.enter();
        tracing::debug!("merge message");
    }
}
