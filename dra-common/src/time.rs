//! Timestamp utilities

use chrono::{DateTime, Datelike, Utc};

/// Mean length of a calendar year in days (Gregorian)
pub const DAYS_PER_YEAR: f64 = 365.2425;

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Current calendar year (UTC)
pub fn current_year() -> i32 {
    now().year()
}

/// Fractional years elapsed from `earlier` to `later`
///
/// Negative when `later` precedes `earlier`.
pub fn years_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let seconds = later.signed_duration_since(earlier).num_seconds() as f64;
    seconds / 86_400.0 / DAYS_PER_YEAR
}
