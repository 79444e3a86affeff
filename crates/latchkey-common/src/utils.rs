//! Utility functions for Latchkey

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch
///
/// Returns 0 if the system clock is set before the epoch.
///
/// # Examples
///
/// ```
/// use latchkey_common::current_timestamp;
///
/// assert!(current_timestamp() > 0);
/// ```
pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
