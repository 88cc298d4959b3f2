//! Time utility functions
//!
//! Timestamps are persisted as INTEGER microseconds since the Unix epoch.

use chrono::{DateTime, Utc};

/// Convert a DateTime<Utc> to microseconds since Unix epoch
pub fn datetime_to_micros(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_micros()
}

/// Current time in microseconds since Unix epoch
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}
