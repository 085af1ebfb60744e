//! Shared timestamp and event-id helpers.

use ulid::Ulid;

/// Current UTC time as unix-epoch seconds; the registry's native timestamp.
pub fn now_epoch() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Returns unix-epoch seconds with `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    format!("{}Z", now_epoch())
}

pub fn new_event_id() -> String {
    Ulid::new().to_string()
}
