//! Timestamp utilities

use chrono::Utc;

/// Current wall-clock time in milliseconds since the Unix epoch
///
/// Queue leases are stored as absolute millisecond deadlines so that every
/// process sharing the store agrees on expiry.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_now_millis_advances() {
        let t1 = now_millis();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let t2 = now_millis();
        assert!(t2 > t1);
    }
}
