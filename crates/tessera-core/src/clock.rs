//! Wall-clock helpers. Peer and connection timestamps are milliseconds
//! since the Unix epoch so they survive restarts and can be persisted.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Milliseconds elapsed since `timestamp`. Saturates at zero for
/// timestamps in the future.
pub fn millis_since(timestamp: u64) -> u64 {
    now_millis().saturating_sub(timestamp)
}

/// Human readable age, e.g. `3 h 12 min` or `41 sec`.
pub fn format_age(age_ms: u64) -> String {
    let age = Duration::from_millis(age_ms);
    let secs = age.as_secs();
    if secs >= 86_400 {
        format!("{} d {} h", secs / 86_400, (secs % 86_400) / 3_600)
    } else if secs >= 3_600 {
        format!("{} h {} min", secs / 3_600, (secs % 3_600) / 60)
    } else if secs >= 60 {
        format!("{} min {} sec", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{secs} sec")
    } else {
        format!("{} ms", age.as_millis())
    }
}
