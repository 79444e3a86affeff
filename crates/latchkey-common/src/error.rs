//! Error types for store access
//!
//! Every store adapter reports failures through [`StoreError`]. The lock
//! protocol never retries these silently; they surface to the caller.

/// Failure of a store primitive
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable during {operation}: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },

    #[error("store timed out during {operation}")]
    Timeout { operation: &'static str },

    #[error("store does not support {0}")]
    Unsupported(&'static str),
}

impl StoreError {
    pub fn unavailable(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            operation,
            message: message.into(),
        }
    }

    /// Name of the primitive that failed, when known
    pub fn operation(&self) -> &'static str {
        match self {
            StoreError::Unavailable { operation, .. } | StoreError::Timeout { operation } => {
                operation
            }
            StoreError::Unsupported(operation) => operation,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::unavailable("get", "connection refused");
        assert_eq!(
            err.to_string(),
            "store unavailable during get: connection refused"
        );

        let err = StoreError::Timeout {
            operation: "set_if_absent",
        };
        assert_eq!(err.to_string(), "store timed out during set_if_absent");

        let err = StoreError::Unsupported("delete_if_live");
        assert_eq!(err.to_string(), "store does not support delete_if_live");
    }

    #[test]
    fn test_operation_name() {
        assert_eq!(StoreError::unavailable("delete", "x").operation(), "delete");
        assert_eq!(
            StoreError::Timeout {
                operation: "get_and_replace"
            }
            .operation(),
            "get_and_replace"
        );
    }
}
