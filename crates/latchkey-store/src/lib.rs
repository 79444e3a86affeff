//! Latchkey Store - key-value adapters for lease storage
//!
//! This crate provides:
//! - The [`StoreAdapter`] trait consumed by the lock protocol
//! - An in-memory adapter backed by `DashMap`, used for tests and single-process runs
//! - A Redis adapter using `SETNX` / `GET` / `GETSET` / `DEL` plus Lua check-and-act scripts

pub mod adapter;
pub mod memory;
pub mod redis_store;

pub use adapter::{ConditionalDelete, StoreAdapter};
pub use latchkey_common::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
