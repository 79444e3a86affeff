//! In-memory store adapter
//!
//! Keeps lease values in a `DashMap`. Each primitive runs under the shard lock
//! of its key, which makes `set_if_absent`, `get_and_replace` and the
//! check-and-act operations atomic with respect to each other.
//!
//! The adapter doubles as a test fixture: it can be switched into an
//! unavailable state to exercise store-failure handling, and it counts the
//! primitive calls it serves.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use latchkey_common::{StoreError, StoreResult};

use crate::adapter::{ConditionalDelete, StoreAdapter};

/// In-memory key-value store
#[derive(Clone, Default)]
pub struct MemoryStore {
    /// Key-value storage: lock key -> encoded expiry
    entries: Arc<DashMap<String, String>>,
    /// Whether the check-and-act operations are offered
    check_and_act: bool,
    /// Simulated outage switch
    unavailable: Arc<AtomicBool>,
    /// Number of primitive calls served
    operations: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer the single-round-trip conditional operations
    pub fn with_check_and_act(mut self) -> Self {
        self.check_and_act = true;
        self
    }

    /// Make every subsequent primitive fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Write a value directly, bypassing availability checks and counters
    pub fn seed(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Read a value directly, bypassing availability checks and counters
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of primitive calls served so far
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }

    fn check_available(&self, operation: &'static str) -> StoreResult<()> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(operation, "memory store is offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.check_available("set_if_absent")?;
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(value.to_string());
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available("get")?;
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn get_and_replace(&self, key: &str, value: &str) -> StoreResult<Option<String>> {
        self.check_available("get_and_replace")?;
        Ok(self.entries.insert(key.to_string(), value.to_string()))
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_available("delete")?;
        self.entries.remove(key);
        Ok(())
    }

    fn supports_check_and_act(&self) -> bool {
        self.check_and_act
    }

    async fn delete_if_live(&self, key: &str, now_ms: i64) -> StoreResult<ConditionalDelete> {
        if !self.check_and_act {
            return Err(StoreError::Unsupported("delete_if_live"));
        }
        self.check_available("delete_if_live")?;

        match self.entries.entry(key.to_string()) {
            Entry::Vacant(_) => Ok(ConditionalDelete::Absent),
            Entry::Occupied(occupied) => {
                let parsed = occupied.get().parse::<i64>();
                match parsed {
                    Err(_) => Ok(ConditionalDelete::Corrupt(occupied.get().clone())),
                    Ok(expires_at) if expires_at >= now_ms => {
                        occupied.remove();
                        Ok(ConditionalDelete::Deleted)
                    }
                    Ok(_) => Ok(ConditionalDelete::Expired),
                }
            }
        }
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> StoreResult<bool> {
        if !self.check_and_act {
            return Err(StoreError::Unsupported("delete_if_equals"));
        }
        self.check_available("delete_if_equals")?;

        Ok(self
            .entries
            .remove_if(key, |_, current| current.as_str() == expected)
            .is_some())
    }

    async fn replace_if_equals(&self, key: &str, expected: &str, value: &str) -> StoreResult<bool> {
        if !self.check_and_act {
            return Err(StoreError::Unsupported("replace_if_equals"));
        }
        self.check_available("replace_if_equals")?;

        match self.entries.get_mut(key) {
            Some(mut current) if current.as_str() == expected => {
                *current = value.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
