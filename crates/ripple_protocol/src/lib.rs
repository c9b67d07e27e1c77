//! # Ripple Sync Protocol
//!
//! Protocol types and JSON codecs for the ripple sync core.
//!
//! This crate provides:
//! - `Record`, `Mutation`, `Event` for versioned replication
//! - The `{type, payload, correlation_id}` message envelope
//! - The fallback request/response `ApiResponse` envelope
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod api;
mod envelope;
mod event;
mod mutation;
mod record;

pub use api::{ApiError, ApiResponse, FetchData, ResponseMeta};
pub use envelope::{ClientMessage, Envelope, ProtocolError, ProtocolResult, ServerMessage};
pub use event::{Event, EventKind};
pub use mutation::Mutation;
pub use record::{Permission, Record};
