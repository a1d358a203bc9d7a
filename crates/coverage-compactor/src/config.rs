//! Consolidation configuration.

use serde::{Deserialize, Serialize};

use coverage_core::error::{Error, Result};

use crate::merge::DEFAULT_MAX_HISTORY;

const DEFAULT_MAX_AGE_DAYS: u32 = 1;
const DEFAULT_LOCATION_HASH_LEN: usize = 6;
const DEFAULT_MERGE_CONCURRENCY: usize = 16;
const DEFAULT_ARCHIVE_CONCURRENCY: usize = 32;

fn default_max_age_days() -> u32 {
    DEFAULT_MAX_AGE_DAYS
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

fn default_location_hash_len() -> usize {
    DEFAULT_LOCATION_HASH_LEN
}

fn default_merge_concurrency() -> usize {
    DEFAULT_MERGE_CONCURRENCY
}

fn default_archive_concurrency() -> usize {
    DEFAULT_ARCHIVE_CONCURRENCY
}

/// Configuration for consolidation runs.
///
/// # Example
///
/// ```rust
/// use coverage_compactor::config::ConsolidationConfig;
///
/// let config = ConsolidationConfig {
///     merge_concurrency: 4,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationConfig {
    /// Minimum sample age (whole days) when a run does not specify one.
    #[serde(default = "default_max_age_days")]
    pub default_max_age_days: u32,

    /// Consolidation batches retained per coverage entry.
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Number of leading key characters that form the location hash.
    #[serde(default = "default_location_hash_len")]
    pub location_hash_len: usize,

    /// Maximum coverage entries merged concurrently.
    #[serde(default = "default_merge_concurrency")]
    pub merge_concurrency: usize,

    /// Maximum samples archived concurrently.
    #[serde(default = "default_archive_concurrency")]
    pub archive_concurrency: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            default_max_age_days: default_max_age_days(),
            max_history: default_max_history(),
            location_hash_len: default_location_hash_len(),
            merge_concurrency: default_merge_concurrency(),
            archive_concurrency: default_archive_concurrency(),
        }
    }
}

impl ConsolidationConfig {
    /// Loads configuration from `COVERAGE_*` environment variables over the defaults.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `COVERAGE_DEFAULT_MAX_AGE_DAYS` | `default_max_age_days` |
    /// | `COVERAGE_MAX_HISTORY` | `max_history` |
    /// | `COVERAGE_LOCATION_HASH_LEN` | `location_hash_len` |
    /// | `COVERAGE_MERGE_CONCURRENCY` | `merge_concurrency` |
    /// | `COVERAGE_ARCHIVE_CONCURRENCY` | `archive_concurrency` |
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed, or the
    /// resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(days) = parse_var::<u32>(&lookup, "COVERAGE_DEFAULT_MAX_AGE_DAYS")? {
            config.default_max_age_days = days;
        }
        if let Some(n) = parse_var::<usize>(&lookup, "COVERAGE_MAX_HISTORY")? {
            config.max_history = n;
        }
        if let Some(n) = parse_var::<usize>(&lookup, "COVERAGE_LOCATION_HASH_LEN")? {
            config.location_hash_len = n;
        }
        if let Some(n) = parse_var::<usize>(&lookup, "COVERAGE_MERGE_CONCURRENCY")? {
            config.merge_concurrency = n;
        }
        if let Some(n) = parse_var::<usize>(&lookup, "COVERAGE_ARCHIVE_CONCURRENCY")? {
            config.archive_concurrency = n;
        }

        config.validate()?;
        Ok(config)
    }

    /// Returns the configuration with every size and concurrency limit raised to at least 1.
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            max_history: self.max_history.max(1),
            location_hash_len: self.location_hash_len.max(1),
            merge_concurrency: self.merge_concurrency.max(1),
            archive_concurrency: self.archive_concurrency.max(1),
            ..self
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` if any size or concurrency limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_history == 0 {
            return Err(Error::InvalidInput(
                "max_history must be at least 1".to_string(),
            ));
        }
        if self.location_hash_len == 0 {
            return Err(Error::InvalidInput(
                "location_hash_len must be at least 1".to_string(),
            ));
        }
        if self.merge_concurrency == 0 {
            return Err(Error::InvalidInput(
                "merge_concurrency must be at least 1".to_string(),
            ));
        }
        if self.archive_concurrency == 0 {
            return Err(Error::InvalidInput(
                "archive_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} is not valid: {e}")))
}
