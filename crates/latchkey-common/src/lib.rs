//! Latchkey Common - Shared types, traits, and utilities
//!
//! This crate provides the foundational types used across all Latchkey components:
//! - Store error type shared by every store adapter
//! - Time source trait for dependency injection
//! - Utility functions

pub mod error;
pub mod traits;
pub mod utils;

// Re-exports for convenience
pub use error::{StoreError, StoreResult};
pub use traits::{Clock, ManualClock, SystemClock};
pub use utils::current_timestamp;

/// Default lease duration in milliseconds (one minute)
pub const DEFAULT_LEASE_DURATION_MS: i64 = 60_000;

/// Default wait budget for a single acquisition in milliseconds
pub const DEFAULT_WAIT_BUDGET_MS: i64 = 10_000;

/// Lower bound of the retry backoff in milliseconds
pub const DEFAULT_BACKOFF_MIN_MS: u64 = 80;

/// Upper bound (inclusive) of the retry backoff in milliseconds
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 100;

/// Suffix appended to a resource id to form its lock key
pub const LOCK_KEY_SUFFIX: &str = "_lock";
