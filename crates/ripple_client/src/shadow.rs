//! Optimistic local record cache.

use crate::error::{ClientError, ClientResult};
use parking_lot::RwLock;
use ripple_protocol::{Event, Mutation, Record};
use std::collections::HashMap;
use uuid::Uuid;

struct ShadowEntry {
    /// What the UI sees: authoritative state plus optimistic guesses.
    current: Record,
    /// Last state confirmed by the server, kept for rollback.
    authoritative: Record,
    pending: bool,
}

/// Local copies of records, tagged pending while an optimistic guess
/// is in flight.
///
/// An authoritative event always replaces the shadow, whether or not
/// it matches the guess; the server's decision wins on any mismatch.
pub struct ShadowCache {
    records: RwLock<HashMap<Uuid, ShadowEntry>>,
    /// Per-list high-water mark of applied event sequences.
    cursors: RwLock<HashMap<Uuid, u64>>,
}

impl ShadowCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a server-confirmed record (snapshot load).
    pub fn insert_baseline(&self, record: Record) {
        self.records.write().insert(
            record.record_id,
            ShadowEntry {
                current: record.clone(),
                authoritative: record,
                pending: false,
            },
        );
    }

    /// Returns the record as the UI should render it.
    pub fn record(&self, record_id: Uuid) -> Option<Record> {
        self.records
            .read()
            .get(&record_id)
            .map(|entry| entry.current.clone())
    }

    /// Returns the current (possibly optimistic) version of a record.
    pub fn version_of(&self, record_id: Uuid) -> Option<u64> {
        self.records
            .read()
            .get(&record_id)
            .map(|entry| entry.current.version)
    }

    /// Returns the last server-confirmed version of a record.
    pub fn authoritative_version_of(&self, record_id: Uuid) -> Option<u64> {
        self.records
            .read()
            .get(&record_id)
            .map(|entry| entry.authoritative.version)
    }

    /// Returns true while an optimistic guess awaits confirmation.
    pub fn is_pending(&self, record_id: Uuid) -> bool {
        self.records
            .read()
            .get(&record_id)
            .is_some_and(|entry| entry.pending)
    }

    /// Applies a mutation optimistically for immediate UI feedback.
    ///
    /// Mirrors the server's last-write-wins policy locally: the local
    /// mutation wins against the cached state. Returns the resulting
    /// local version.
    pub fn apply_optimistic(&self, mutation: &Mutation, now_ms: u64) -> ClientResult<u64> {
        let mut records = self.records.write();
        let entry = records
            .get_mut(&mutation.record_id)
            .ok_or(ClientError::UnknownRecord(mutation.record_id))?;

        let new_version = entry.current.version + 1;
        entry.current.apply_fields(&mutation.fields, new_version, now_ms);
        entry.pending = true;
        Ok(new_version)
    }

    /// Restores the last authoritative state of a record.
    pub fn rollback(&self, record_id: Uuid) -> bool {
        let mut records = self.records.write();
        match records.get_mut(&record_id) {
            Some(entry) => {
                entry.current = entry.authoritative.clone();
                entry.pending = false;
                true
            }
            None => false,
        }
    }

    /// Applies server truth, replacing any optimistic guess.
    pub fn apply_authoritative(&self, event: &Event) {
        self.records.write().insert(
            event.record.record_id,
            ShadowEntry {
                current: event.record.clone(),
                authoritative: event.record.clone(),
                pending: false,
            },
        );
        self.advance_cursor(event.list_id, event.sequence);
    }

    /// Returns the per-list event cursor.
    pub fn last_sequence(&self, list_id: Uuid) -> u64 {
        self.cursors.read().get(&list_id).copied().unwrap_or(0)
    }

    /// Advances the per-list event cursor (never backwards).
    pub fn advance_cursor(&self, list_id: Uuid, sequence: u64) {
        let mut cursors = self.cursors.write();
        let cursor = cursors.entry(list_id).or_insert(0);
        *cursor = (*cursor).max(sequence);
    }

    /// Replaces a whole list with a fresh snapshot.
    ///
    /// Pending guesses for the list are dropped; the offline queue
    /// still holds their mutations, so replay re-applies them on top
    /// of the snapshot.
    pub fn replace_list(&self, list_id: Uuid, records: Vec<Record>, latest_sequence: u64) {
        let mut map = self.records.write();
        map.retain(|_, entry| entry.current.list_id != list_id);
        for record in records {
            map.insert(
                record.record_id,
                ShadowEntry {
                    current: record.clone(),
                    authoritative: record,
                    pending: false,
                },
            );
        }
        drop(map);
        self.advance_cursor(list_id, latest_sequence);
    }

    /// Returns the cached records of a list, ordered by record id.
    pub fn list_records(&self, list_id: Uuid) -> Vec<Record> {
        let records = self.records.read();
        let mut out: Vec<Record> = records
            .values()
            .filter(|entry| entry.current.list_id == list_id)
            .map(|entry| entry.current.clone())
            .collect();
        out.sort_by_key(|r| r.record_id);
        out
    }

    /// Returns the number of cached records.
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }
}

impl Default for ShadowCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    fn make_record(list_id: Uuid, version: u64) -> Record {
        let mut record = Record::new(Uuid::new_v4(), list_id, Uuid::new_v4(), Map::new(), 0);
        record.version = version;
        record
    }

    fn fields(value: &str) -> Map<String, serde_json::Value> {
        let mut map = Map::new();
        map.insert("title".into(), json!(value));
        map
    }

    #[test]
    fn optimistic_apply_and_rollback() {
        let cache = ShadowCache::new();
        let record = make_record(Uuid::new_v4(), 3);
        cache.insert_baseline(record.clone());

        let mutation = Mutation::new(
            record.record_id,
            record.list_id,
            3,
            fields("guess"),
            record.owner,
        );
        let version = cache.apply_optimistic(&mutation, 100).unwrap();

        assert_eq!(version, 4);
        assert!(cache.is_pending(record.record_id));
        assert_eq!(
            cache.record(record.record_id).unwrap().fields.get("title"),
            Some(&json!("guess"))
        );

        assert!(cache.rollback(record.record_id));
        assert!(!cache.is_pending(record.record_id));
        assert_eq!(cache.version_of(record.record_id), Some(3));
    }

    #[test]
    fn authoritative_event_wins_over_guess() {
        let cache = ShadowCache::new();
        let record = make_record(Uuid::new_v4(), 3);
        cache.insert_baseline(record.clone());

        let mutation = Mutation::new(
            record.record_id,
            record.list_id,
            3,
            fields("guess"),
            record.owner,
        );
        cache.apply_optimistic(&mutation, 100).unwrap();

        // Server applied someone else's change instead.
        let mut server_record = record.clone();
        server_record.apply_fields(&fields("truth"), 4, 200);
        let mut event = Event::applied(server_record, record.owner, 200);
        event.sequence = 9;
        cache.apply_authoritative(&event);

        let current = cache.record(record.record_id).unwrap();
        assert_eq!(current.fields.get("title"), Some(&json!("truth")));
        assert!(!cache.is_pending(record.record_id));
        assert_eq!(cache.last_sequence(record.list_id), 9);
    }

    #[test]
    fn unknown_record_cannot_be_mutated() {
        let cache = ShadowCache::new();
        let mutation = Mutation::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            Map::new(),
            Uuid::new_v4(),
        );

        let result = cache.apply_optimistic(&mutation, 0);
        assert!(matches!(result, Err(ClientError::UnknownRecord(_))));
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let cache = ShadowCache::new();
        let list_id = Uuid::new_v4();

        cache.advance_cursor(list_id, 10);
        cache.advance_cursor(list_id, 4);
        assert_eq!(cache.last_sequence(list_id), 10);
    }

    #[test]
    fn replace_list_drops_stale_records() {
        let cache = ShadowCache::new();
        let list_id = Uuid::new_v4();
        let stale = make_record(list_id, 2);
        let unrelated = make_record(Uuid::new_v4(), 1);
        cache.insert_baseline(stale.clone());
        cache.insert_baseline(unrelated.clone());

        let fresh = make_record(list_id, 7);
        cache.replace_list(list_id, vec![fresh.clone()], 42);

        assert!(cache.record(stale.record_id).is_none());
        assert!(cache.record(unrelated.record_id).is_some());
        assert_eq!(cache.version_of(fresh.record_id), Some(7));
        assert_eq!(cache.last_sequence(list_id), 42);
    }
}
