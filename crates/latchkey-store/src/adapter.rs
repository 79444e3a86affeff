//! Store adapter trait
//!
//! The lock protocol needs four primitives from the backing store. Two of them
//! (`set_if_absent` and `get_and_replace`) must be atomic on the store side;
//! all mutual exclusion rests on that guarantee.
//!
//! Stores that can run a conditional read-and-mutate in a single round trip
//! advertise it through [`StoreAdapter::supports_check_and_act`]. The lock uses
//! those operations in place of the two-step read-then-act sequences when
//! available.

use async_trait::async_trait;
use latchkey_common::{StoreError, StoreResult};

/// Result of a server-side conditional delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalDelete {
    /// The lease was still live and has been deleted
    Deleted,
    /// The lease had already expired; it was left in place
    Expired,
    /// No lease was stored under the key
    Absent,
    /// The stored value is not an epoch-millisecond timestamp
    Corrupt(String),
}

/// Key-value primitives required by the lease protocol
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Short adapter name used in logs
    fn name(&self) -> &'static str;

    /// Write `value` only if `key` holds nothing. Returns true iff this call created the key.
    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Unconditionally write `value` and return whatever it overwrote
    async fn get_and_replace(&self, key: &str, value: &str) -> StoreResult<Option<String>>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Whether [`delete_if_live`](Self::delete_if_live),
    /// [`delete_if_equals`](Self::delete_if_equals) and
    /// [`replace_if_equals`](Self::replace_if_equals) are implemented
    fn supports_check_and_act(&self) -> bool {
        false
    }

    /// Delete `key` only if it holds an expiry timestamp `>= now_ms`
    async fn delete_if_live(&self, _key: &str, _now_ms: i64) -> StoreResult<ConditionalDelete> {
        Err(StoreError::Unsupported("delete_if_live"))
    }

    /// Delete `key` only if it currently holds exactly `expected`
    async fn delete_if_equals(&self, _key: &str, _expected: &str) -> StoreResult<bool> {
        Err(StoreError::Unsupported("delete_if_equals"))
    }

    /// Replace the value of `key` with `value` only if it currently equals `expected`
    async fn replace_if_equals(
        &self,
        _key: &str,
        _expected: &str,
        _value: &str,
    ) -> StoreResult<bool> {
        Err(StoreError::Unsupported("replace_if_equals"))
    }
}
