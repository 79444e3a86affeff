//! Lease expiry arithmetic and encoding
//!
//! A lease is stored as the decimal string of its absolute expiry in epoch
//! milliseconds. A lease whose expiry is at or before "now" is stale and may
//! be stolen.

/// Absolute expiry for a lease taken at `now_ms`
pub fn new_expiry(now_ms: i64, lease_duration_ms: i64) -> i64 {
    now_ms.saturating_add(lease_duration_ms)
}

pub fn encode_expiry(expires_at_ms: i64) -> String {
    expires_at_ms.to_string()
}

/// Parse a stored lease value. `None` means the value is corrupt.
pub fn decode_expiry(value: &str) -> Option<i64> {
    value.parse::<i64>().ok()
}

pub fn is_stale(expires_at_ms: i64, now_ms: i64) -> bool {
    expires_at_ms <= now_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_expiry() {
        assert_eq!(new_expiry(1_000, 60_000), 61_000);
        assert_eq!(new_expiry(i64::MAX - 1, 60_000), i64::MAX);
    }

    #[test]
    fn test_decode_expiry() {
        assert_eq!(decode_expiry("1534150000000"), Some(1_534_150_000_000));
        assert_eq!(decode_expiry(&encode_expiry(-5)), Some(-5));
        assert_eq!(decode_expiry(""), None);
        assert_eq!(decode_expiry("12ab"), None);
        assert_eq!(decode_expiry(" 12"), None);
        assert_eq!(decode_expiry("1.5"), None);
    }

    #[test]
    fn test_staleness_boundary() {
        assert!(is_stale(999, 1_000));
        assert!(is_stale(1_000, 1_000));
        assert!(!is_stale(1_001, 1_000));
    }
}
