use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, as used by JWT `iat`, `nbf` and `exp`.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
