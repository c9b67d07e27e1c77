//! Append-only event log.

use ripple_protocol::Event;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Result of a scoped log read.
#[derive(Debug, Clone)]
pub enum LogRead {
    /// The requested range, in sequence order.
    Events(Vec<Event>),
    /// The requested range reaches behind the retention horizon and
    /// cannot be served; the consumer must resnapshot.
    Gap {
        /// Highest sequence that has been archived away.
        archived_through: u64,
    },
}

/// Append-only ledger of accepted mutations.
///
/// Sequence numbers start at 1, increase monotonically, and are
/// assigned at append time. Secondary indexes by list and by record
/// serve scoped replay and history queries. The log itself is not
/// synchronized; it lives inside the store's critical section so that
/// a state change and its events commit together.
pub struct EventLog {
    events: BTreeMap<u64, Event>,
    by_list: HashMap<Uuid, Vec<u64>>,
    by_record: HashMap<Uuid, Vec<u64>>,
    next_sequence: u64,
    archived_through: u64,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self {
            events: BTreeMap::new(),
            by_list: HashMap::new(),
            by_record: HashMap::new(),
            next_sequence: 1,
            archived_through: 0,
        }
    }

    /// Appends an event, assigning the next sequence number.
    pub fn append(&mut self, mut event: Event) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        event.sequence = sequence;

        self.by_list.entry(event.list_id).or_default().push(sequence);
        self.by_record
            .entry(event.record.record_id)
            .or_default()
            .push(sequence);
        self.events.insert(sequence, event);
        sequence
    }

    /// Returns events for a list with sequence greater than `after`.
    ///
    /// Reports a gap when `after` predates the retention horizon: some
    /// of the requested range may have been archived, so an
    /// incremental read can no longer be trusted.
    pub fn since(&self, list_id: Uuid, after: u64) -> LogRead {
        if after < self.archived_through {
            return LogRead::Gap {
                archived_through: self.archived_through,
            };
        }

        let sequences = match self.by_list.get(&list_id) {
            Some(sequences) => sequences,
            None => return LogRead::Events(Vec::new()),
        };

        let start = sequences.partition_point(|&s| s <= after);
        let events = sequences[start..]
            .iter()
            .filter_map(|s| self.events.get(s).cloned())
            .collect();
        LogRead::Events(events)
    }

    /// Returns the retained history of one record, in sequence order.
    pub fn history(&self, record_id: Uuid) -> Vec<Event> {
        self.by_record
            .get(&record_id)
            .map(|sequences| {
                sequences
                    .iter()
                    .filter_map(|s| self.events.get(s).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the highest sequence assigned so far.
    pub fn latest_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Archives events with sequence up to and including `through`.
    ///
    /// Archived events leave the retained window; reads reaching
    /// behind the horizon report a gap instead of silently missing
    /// them.
    pub fn archive_up_to(&mut self, through: u64) {
        if through <= self.archived_through {
            return;
        }

        let retained = self.events.split_off(&(through + 1));
        self.events = retained;
        for sequences in self.by_list.values_mut() {
            sequences.retain(|&s| s > through);
        }
        for sequences in self.by_record.values_mut() {
            sequences.retain(|&s| s > through);
        }
        self.archived_through = through;
    }

    /// Returns the number of retained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no events are retained.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
