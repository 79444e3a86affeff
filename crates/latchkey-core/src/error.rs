//! Lock error types

use latchkey_common::StoreError;

use crate::cancel::CancelReason;

/// Error type for lease acquisition and release
///
/// Running out of wait budget is not an error; see
/// [`Acquisition::TimedOut`](crate::Acquisition::TimedOut).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    #[error("corrupt lease value under {key}: {value:?}")]
    CorruptLeaseValue { key: String, value: String },

    #[error("acquisition cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("invalid lock options: {0}")]
    InvalidOptions(String),
}

impl LockError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
