//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in Unix milliseconds.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Current time in Unix seconds.
pub fn unix_seconds() -> u64 {
    unix_millis() / 1000
}
