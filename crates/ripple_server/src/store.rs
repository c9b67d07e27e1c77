//! In-memory source of truth.

use crate::error::ServerResult;
use crate::event_log::{EventLog, LogRead};
use parking_lot::RwLock;
use ripple_protocol::{Event, Record};
use std::collections::HashMap;
use uuid::Uuid;

struct StoreState {
    records: HashMap<Uuid, Record>,
    log: EventLog,
    resolved: HashMap<Uuid, Event>,
}

/// Authoritative record store with its event log.
///
/// Records, the event log, and the resolved idempotency-token table
/// live behind one lock, so a commit applies the state change, appends
/// the events, and records the token in a single critical section.
/// That is the in-memory equivalent of the durable store's
/// one-transaction contract: no event without a state change, no state
/// change without an event.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    /// Commits to fail before succeeding again.
    #[cfg(test)]
    fail_next_commits: std::sync::atomic::AtomicU32,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState {
                records: HashMap::new(),
                log: EventLog::new(),
                resolved: HashMap::new(),
            }),
            #[cfg(test)]
            fail_next_commits: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Inserts a record outside the mutation path.
    ///
    /// Record creation is request plumbing outside the sync core; this
    /// is the seam the surrounding application uses to seed state.
    pub fn insert_record(&self, record: Record) {
        self.state.write().records.insert(record.record_id, record);
    }

    /// Returns the current state of a record.
    pub fn record(&self, record_id: Uuid) -> Option<Record> {
        self.state.read().records.get(&record_id).cloned()
    }

    /// Returns all records of a list, ordered by record id.
    pub fn list_records(&self, list_id: Uuid) -> Vec<Record> {
        let state = self.state.read();
        let mut records: Vec<Record> = state
            .records
            .values()
            .filter(|r| r.list_id == list_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.record_id);
        records
    }

    /// Returns the event a previously resolved token produced.
    pub fn resolved_event(&self, token: Uuid) -> Option<Event> {
        self.state.read().resolved.get(&token).cloned()
    }

    /// Commits a record update together with its events and token.
    ///
    /// Events are appended in the given order and returned with their
    /// assigned sequences; the first one is what a replayed token gets
    /// back.
    pub fn commit(&self, record: Record, events: Vec<Event>, token: Uuid) -> ServerResult<Vec<Event>> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            if self
                .fail_next_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(crate::error::ServerError::TransportUnavailable(
                    "injected commit failure".into(),
                ));
            }
        }

        let mut state = self.state.write();
        let mut committed = Vec::with_capacity(events.len());
        for mut event in events {
            let sequence = state.log.append(event.clone());
            event.sequence = sequence;
            committed.push(event);
        }
        state.records.insert(record.record_id, record);
        if let Some(first) = committed.first() {
            state.resolved.insert(token, first.clone());
        }
        Ok(committed)
    }

    /// Returns events for a list with sequence greater than `after`.
    pub fn events_since(&self, list_id: Uuid, after: u64) -> LogRead {
        self.state.read().log.since(list_id, after)
    }

    /// Returns the retained history of one record.
    pub fn history(&self, record_id: Uuid) -> Vec<Event> {
        self.state.read().log.history(record_id)
    }

    /// Returns the highest sequence assigned so far.
    pub fn latest_sequence(&self) -> u64 {
        self.state.read().log.latest_sequence()
    }

    /// Returns the number of retained events.
    pub fn event_count(&self) -> usize {
        self.state.read().log.len()
    }

    /// Archives events up to and including `through`.
    pub fn archive_up_to(&self, through: u64) {
        self.state.write().log.archive_up_to(through);
    }

    /// Makes the next `n` commits fail with `TransportUnavailable`.
    #[cfg(test)]
    pub fn fail_next_commits(&self, n: u32) {
        self.fail_next_commits
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
