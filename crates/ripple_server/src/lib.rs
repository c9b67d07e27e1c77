//! # Ripple Sync Server
//!
//! Server-side synchronization core for ripple.
//!
//! This crate provides:
//! - `MemoryStore` + `EventLog`: versioned records with an append-only
//!   event ledger, committed atomically
//! - `validate`: accept / conflict / reject decisions per mutation
//! - `SyncCoordinator`: the single writer path, serialized per record
//! - `EventBroker` / `ProcessBroker`: cross-instance event fan-out
//! - `ConnectionRegistry`: per-instance connections, subscriptions,
//!   heartbeats
//! - `SyncServer`: the facade an instance exposes to its transport
//!
//! ## Key Invariants
//!
//! - Versions per record are strictly increasing and gapless
//! - No event without a state change, no state change without an event
//! - Conflicts resolve by last-write-wins in acceptance order, with an
//!   audit event; they are never surfaced as failures
//! - Event delivery per list is in sequence order; duplicates are
//!   dropped at the registry

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod broker;
mod config;
mod coordinator;
mod error;
mod event_log;
mod registry;
mod server;
mod store;
mod validator;

pub use auth::{AuthConfig, TokenValidator};
pub use broker::{EventBroker, ProcessBroker};
pub use config::ServerConfig;
pub use coordinator::{SubmitOutcome, SyncCoordinator};
pub use error::{ServerError, ServerResult};
pub use event_log::{EventLog, LogRead};
pub use registry::{ConnectionRegistry, ConnectionState};
pub use server::SyncServer;
pub use store::MemoryStore;
pub use validator::{validate, Decision};

/// Current time as Unix milliseconds.
pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
