//! Error types for the client engine.

use ripple_protocol::ApiError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur during reconciliation.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server rejected the request for good.
    #[error("server rejected request ({code}): {message}")]
    Rejected {
        /// Machine-readable code from the response envelope.
        code: String,
        /// Human-readable description.
        message: String,
    },

    /// Invalid message or response format.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The record is not in the local cache.
    #[error("record not cached locally: {0}")]
    UnknownRecord(Uuid),

    /// Reconciliation was cancelled.
    #[error("reconciliation cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Converts a fallback-surface error into a client error.
    pub fn from_api(error: ApiError) -> Self {
        if error.code == "transport_unavailable" {
            Self::Transport {
                message: error.message,
                retryable: true,
            }
        } else {
            Self::Rejected {
                code: error.code,
                message: error.message,
            }
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Returns true for a definitive server rejection.
    ///
    /// A rejected mutation is rolled back and dropped from the queue;
    /// retrying it would re-reject identically.
    pub fn is_fatal_rejection(&self) -> bool {
        matches!(self, ClientError::Rejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ClientError::transport_retryable("connection lost").is_retryable());
        assert!(!ClientError::transport_fatal("invalid certificate").is_retryable());
        assert!(!ClientError::Cancelled.is_retryable());
    }

    #[test]
    fn api_error_mapping() {
        let unavailable = ClientError::from_api(ApiError {
            code: "transport_unavailable".into(),
            message: "store down".into(),
            details: None,
        });
        assert!(unavailable.is_retryable());
        assert!(!unavailable.is_fatal_rejection());

        let denied = ClientError::from_api(ApiError {
            code: "permission_denied".into(),
            message: "no write access".into(),
            details: None,
        });
        assert!(!denied.is_retryable());
        assert!(denied.is_fatal_rejection());
    }
}
