//! Durable results of accepted mutations.

use crate::record::Record;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What an event records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A mutation was accepted cleanly against the current version.
    Applied,
    /// A stale-based mutation won under last-write-wins; the audit
    /// trail keeps the version it overwrote.
    ConflictResolved {
        /// The version that was current when the winning mutation
        /// arrived, now superseded.
        superseded_version: u64,
    },
}

/// The durable, immutable result of an accepted mutation.
///
/// Sequence numbers are assigned by the event log, are unique across
/// the log, and increase monotonically. Within one list, consumers
/// always observe events in sequence order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Log-assigned sequence number (0 until appended).
    pub sequence: u64,
    /// The list the mutated record belongs to.
    pub list_id: Uuid,
    /// Record state after the mutation.
    pub record: Record,
    /// Version the mutation produced.
    pub version: u64,
    /// The account whose mutation produced this event.
    pub acting_user: Uuid,
    /// Unix-millisecond acceptance timestamp.
    pub timestamp_ms: u64,
    /// Whether this is a plain application or a conflict audit entry.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Creates an event for a cleanly applied mutation.
    ///
    /// The sequence is assigned when the event log appends it.
    pub fn applied(record: Record, acting_user: Uuid, timestamp_ms: u64) -> Self {
        Self {
            sequence: 0,
            list_id: record.list_id,
            version: record.version,
            record,
            acting_user,
            timestamp_ms,
            kind: EventKind::Applied,
        }
    }

    /// Creates a conflict-audit event for a last-write-wins overwrite.
    pub fn conflict_resolved(
        record: Record,
        acting_user: Uuid,
        timestamp_ms: u64,
        superseded_version: u64,
    ) -> Self {
        Self {
            sequence: 0,
            list_id: record.list_id,
            version: record.version,
            record,
            acting_user,
            timestamp_ms,
            kind: EventKind::ConflictResolved { superseded_version },
        }
    }

    /// Returns true if this event is a conflict audit entry.
    pub fn is_conflict_audit(&self) -> bool {
        matches!(self.kind, EventKind::ConflictResolved { .. })
    }
}
