//! Timestamp utilities
//!
//! Fragment ordering and timer deadlines use epoch milliseconds so that
//! comparisons survive round-trips through SQLite INTEGER columns.

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC time as epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds back to a UTC timestamp
///
/// Out-of-range values fall back to the epoch rather than panicking.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_recent() {
        let ms = now_ms();
        // After 2020-01-01 and before 2100-01-01
        assert!(ms > 1_577_836_800_000);
        assert!(ms < 4_102_444_800_000);
    }

    #[test]
    fn test_ms_round_trip() {
        let ms = now_ms();
        let dt = ms_to_datetime(ms);
        assert_eq!(dt.timestamp_millis(), ms);
    }

}
