//! Latchkey Core - lease-based mutual exclusion over a key-value store
//!
//! A lease is a single key (`<resource>_lock`) whose value is the decimal
//! epoch-millisecond time at which it expires. Contenders create it with
//! set-if-absent, steal it with get-and-replace once it is stale, and delete it
//! on release while it is still live.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use latchkey_core::{LeaseLock, LockOptions};
//! use latchkey_store::MemoryStore;
//!
//! # async fn run() -> latchkey_core::Result<()> {
//! let lock = LeaseLock::new(Arc::new(MemoryStore::new()), LockOptions::default())?;
//! if let Some(grant) = lock.acquire("orderno").await?.into_grant() {
//!     // critical section
//!     lock.release_grant(&grant).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod cancel;
pub mod error;
pub mod key;
pub mod lease;
pub mod lock;

pub use backoff::{
    BackoffRange, Delay, FixedJitter, JitterSource, RecordingDelay, SeededJitter, TokioDelay,
};
pub use cancel::{CancelReason, CancelSignal};
pub use error::{LockError, Result};
pub use key::{derive_key, derive_key_with_suffix};
pub use lock::*;
