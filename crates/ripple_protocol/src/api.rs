//! Response envelope for the fallback request/response surface.

use crate::event::Event;
use crate::record::Record;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata attached to every fallback response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Unix-millisecond server timestamp.
    pub timestamp: u64,
    /// Record version the response concerns, when one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Structured error carried by failed fallback responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Machine-readable code (`not_found`, `permission_denied`,
    /// `transport_unavailable`, `invalid_request`).
    pub code: String,
    /// Human-readable description.
    pub message: String,
    /// Optional structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Envelope for the fallback request/response surface.
///
/// Serializes as `{ "success": true, "data": ..., "meta": ... }` or
/// `{ "success": false, "error": {...}, "meta": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the call succeeded.
    pub success: bool,
    /// Payload of a successful call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error of a failed call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
    /// Response metadata.
    pub meta: ResponseMeta,
}

impl<T> ApiResponse<T> {
    /// Creates a successful response.
    pub fn ok(data: T, version: Option<u64>, timestamp: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            meta: ResponseMeta { timestamp, version },
        }
    }

    /// Creates a failed response.
    pub fn fail(
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
        timestamp: u64,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
                details,
            }),
            meta: ResponseMeta {
                timestamp,
                version: None,
            },
        }
    }
}

/// Payload of the list-retrieval call.
///
/// Incremental catch-up returns `events` since the requested sequence.
/// When the requested sequence predates the log's retention horizon,
/// `snapshot` carries the full current record set instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchData {
    /// Events after the requested sequence, in sequence order.
    pub events: Vec<Event>,
    /// Full record snapshot when incremental catch-up is impossible.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Vec<Record>>,
    /// Highest sequence in the log for this list at response time.
    pub latest_sequence: u64,
}

impl FetchData {
    /// Creates an incremental response.
    pub fn incremental(events: Vec<Event>, latest_sequence: u64) -> Self {
        Self {
            events,
            snapshot: None,
            latest_sequence,
        }
    }

    /// Creates a full-snapshot response.
    pub fn snapshot(records: Vec<Record>, latest_sequence: u64) -> Self {
        Self {
            events: Vec::new(),
            snapshot: Some(records),
            latest_sequence,
        }
    }

    /// Returns true if the client must discard local state and reload.
    pub fn is_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }
}
