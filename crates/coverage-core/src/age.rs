//! Sample age helpers.
//!
//! Sample timestamps are whole seconds since the Unix epoch.

use chrono::{DateTime, Utc};

/// Seconds in one day.
pub const SECONDS_PER_DAY: i64 = 86_400;

/// Returns the number of whole days elapsed between `time` and `now`.
///
/// The result is floored, so a sample written 23 hours ago is 0 days old. Timestamps in
/// the future yield a negative age.
///
/// # Example
///
/// ```rust
/// use chrono::{TimeZone, Utc};
/// use coverage_core::age::age_in_days;
///
/// let now = Utc.timestamp_opt(10 * 86_400, 0).unwrap();
/// assert_eq!(age_in_days(8 * 86_400 + 1, now), 1);
/// ```
#[must_use]
pub fn age_in_days(time: i64, now: DateTime<Utc>) -> i64 {
    now.timestamp()
        .saturating_sub(time)
        .div_euclid(SECONDS_PER_DAY)
}

/// Returns the timestamp (seconds since epoch) that is `days` whole days before `now`.
#[must_use]
pub fn days_before(now: DateTime<Utc>, days: i64) -> i64 {
    now.timestamp()
        .saturating_sub(days.saturating_mul(SECONDS_PER_DAY))
}
