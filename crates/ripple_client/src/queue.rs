//! Client-owned offline mutation queue.

use ripple_protocol::Mutation;
use std::collections::VecDeque;
use uuid::Uuid;

/// An entry in the offline queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// The queued mutation.
    pub mutation: Mutation,
    /// Whether the server has acknowledged it.
    pub acknowledged: bool,
}

impl QueueEntry {
    fn new(mutation: Mutation) -> Self {
        Self {
            mutation,
            acknowledged: false,
        }
    }
}

/// FIFO queue of mutations not yet acknowledged by the server.
///
/// Entries keep their idempotency token across retries, so replaying
/// a flaky submission can never double-apply. An entry leaves the
/// queue once acknowledged, or when a conflict-resolution decision
/// supersedes it.
///
/// # Invariants
///
/// - Entries are in creation order and replay in that order
/// - Acknowledged entries can be compacted away
pub struct OfflineQueue {
    entries: VecDeque<QueueEntry>,
}

impl OfflineQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Restores a queue from persisted pending mutations.
    pub fn from_pending(mutations: Vec<Mutation>) -> Self {
        Self {
            entries: mutations.into_iter().map(QueueEntry::new).collect(),
        }
    }

    /// Appends a mutation awaiting acknowledgment.
    pub fn enqueue(&mut self, mutation: Mutation) {
        self.entries.push_back(QueueEntry::new(mutation));
    }

    /// Returns pending (unacknowledged) mutations in order.
    pub fn pending(&self) -> impl Iterator<Item = &Mutation> {
        self.entries
            .iter()
            .filter(|e| !e.acknowledged)
            .map(|e| &e.mutation)
    }

    /// Returns pending mutations up to a limit.
    pub fn pending_batch(&self, limit: usize) -> Vec<Mutation> {
        self.pending().take(limit).cloned().collect()
    }

    /// Returns the number of pending mutations.
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.acknowledged).count()
    }

    /// Marks the entry with the given token as acknowledged.
    pub fn acknowledge(&mut self, token: Uuid) {
        for entry in &mut self.entries {
            if entry.mutation.idempotency_token == token {
                entry.acknowledged = true;
            }
        }
    }

    /// Drops the entry with the given token (superseded or rejected).
    pub fn discard(&mut self, token: Uuid) {
        self.entries
            .retain(|e| e.mutation.idempotency_token != token);
    }

    /// Removes acknowledged entries from the front of the queue.
    pub fn compact(&mut self) {
        while let Some(entry) = self.entries.front() {
            if entry.acknowledged {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns the total number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new()
    }
}
