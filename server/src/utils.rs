use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Get current timestamp in milliseconds
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

// Time left until the given millisecond timestamp, zero once it has passed
pub fn duration_until(timestamp: u64) -> Duration {
    Duration::from_millis(timestamp.saturating_sub(get_timestamp()))
}
