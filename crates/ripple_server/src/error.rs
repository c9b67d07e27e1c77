//! Error types for the sync server.

use thiserror::Error;
use uuid::Uuid;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync core.
///
/// Version conflicts are not represented here: they are resolved
/// automatically by last-write-wins and recorded as audit events,
/// never surfaced as failures.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The target record does not exist.
    #[error("record not found: {0}")]
    NotFound(Uuid),

    /// The acting user lacks write permission on the target record.
    #[error("user {user} has no write access to record {record_id}")]
    PermissionDenied {
        /// The acting user.
        user: Uuid,
        /// The record the mutation targeted.
        record_id: Uuid,
    },

    /// The request is malformed or inconsistent with server state.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Credential check failed.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The store or broker is unreachable; the mutation was not
    /// accepted and the caller must retry.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// No connection with the given id is registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(Uuid),

    /// A connection-state transition that the lifecycle forbids.
    #[error("invalid connection state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: &'static str,
        /// Attempted target state.
        to: &'static str,
    },
}

impl ServerError {
    /// Machine-readable code for the fallback response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::NotFound(_) => "not_found",
            ServerError::PermissionDenied { .. } => "permission_denied",
            ServerError::InvalidRequest(_) => "invalid_request",
            ServerError::NotAuthorized(_) => "not_authorized",
            ServerError::TransportUnavailable(_) => "transport_unavailable",
            ServerError::UnknownConnection(_) => "unknown_connection",
            ServerError::InvalidTransition { .. } => "invalid_state",
        }
    }

    /// Returns true if the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServerError::TransportUnavailable(_))
    }

    /// Returns true if the fault lies with the request, not the server.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ServerError::TransportUnavailable(_))
    }
}
