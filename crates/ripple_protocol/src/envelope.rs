//! Message envelope for the persistent-connection protocol.

use crate::event::Event;
use crate::mutation::Mutation;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type for protocol codecs.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors produced while encoding or decoding protocol messages.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The message was not valid JSON or did not match the envelope.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Express interest in a list's events.
    Subscribe {
        /// The list to watch.
        list_id: Uuid,
        /// Highest sequence the client has already seen for this list.
        /// Events after it are replayed before the live stream begins.
        #[serde(default)]
        last_sequence: u64,
    },
    /// Stop watching a list.
    Unsubscribe {
        /// The list to stop watching.
        list_id: Uuid,
    },
    /// Propose a change to a record.
    Mutate(Mutation),
}

/// Messages the server pushes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// An accepted mutation, delivered to every subscriber of its list.
    Event(Event),
    /// The submitter's mutation was resolved by last-write-wins.
    Conflict {
        /// Version the winning mutation overwrote.
        superseded_version: u64,
        /// The event the winning mutation produced.
        winning_event: Event,
    },
    /// Gap-fill replay is impossible; the client must resnapshot.
    SyncRequired {
        /// The list that needs a fresh snapshot.
        list_id: Uuid,
    },
}

/// The wire envelope wrapping every message in both directions.
///
/// Serializes as `{ "type": ..., "payload": ..., "correlation_id": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<M> {
    /// The typed message, flattened into `type` and `payload`.
    #[serde(flatten)]
    pub message: M,
    /// Caller-chosen identifier echoed on related responses.
    pub correlation_id: String,
}

impl<M: Serialize + DeserializeOwned> Envelope<M> {
    /// Wraps a message with a correlation id.
    pub fn new(message: M, correlation_id: impl Into<String>) -> Self {
        Self {
            message,
            correlation_id: correlation_id.into(),
        }
    }

    /// Encodes the envelope to a JSON string.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decodes an envelope from a JSON string.
    pub fn decode(raw: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
