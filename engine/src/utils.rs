//! Timestamp formatting and tolerant time matching shared by alerts and reports

use chrono::{DateTime, Duration, Utc};

/// Two timestamps closer than this are treated as the same sample
pub const TIME_TOLERANCE_MS: i64 = 500;

/// Check if two times are within 500 milliseconds of each other
pub fn times_match(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (b - a).num_milliseconds().abs() < TIME_TOLERANCE_MS
}

/// Check if `b` is at or after `a`, allowing the usual tolerance
pub fn reached(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    b >= a || times_match(a, b)
}

/// Format a timestamp for display
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Format a timestamp for report file names
pub fn format_timestamp_filename(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Convert whole seconds to a chrono duration
pub fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1_000))
}
