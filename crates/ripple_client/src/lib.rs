//! # Ripple Sync Client
//!
//! Client-side reconciliation core for ripple.
//!
//! This crate provides:
//! - `OfflineQueue`: durable-queue shape for unacknowledged mutations
//! - `ShadowCache`: optimistic local records with per-list cursors
//! - `SyncTransport`: the network seam, with a mock for testing
//! - `ReconcileEngine`: the fetch-then-replay state machine with
//!   exponential reconnection backoff
//!
//! ## Architecture
//!
//! Reconciliation is **fetch-then-replay**:
//! 1. Fetch authoritative events (or a snapshot) per tracked list
//! 2. Apply them to the shadow — server truth always wins
//! 3. Replay the offline queue FIFO, idempotently, on that baseline
//!
//! ## Key Invariants
//!
//! - The server is authoritative; optimistic guesses are always
//!   replaced by returned events
//! - Idempotency tokens survive rebasing and retries
//! - Queue entries leave only on acknowledgment or definitive
//!   rejection

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod queue;
mod shadow;
mod transport;

pub use config::{BackoffConfig, ClientConfig};
pub use engine::{CycleResult, ReconcileEngine, ReconcileState, ReconcileStats, RejectedMutation};
pub use error::{ClientError, ClientResult};
pub use queue::{OfflineQueue, QueueEntry};
pub use shadow::ShadowCache;
pub use transport::{MockTransport, SyncTransport};

/// Current time as Unix milliseconds.
pub(crate) fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
