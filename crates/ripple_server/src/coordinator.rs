//! Mutation submission path.

use crate::broker::EventBroker;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::MemoryStore;
use crate::validator::{validate, Decision};
use parking_lot::Mutex;
use ripple_protocol::{Event, EventKind, Mutation};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Keyed mutual exclusion: one lock per record identifier.
///
/// The in-memory equivalent of a row-level lock. Mutations for one
/// record serialize; mutations for distinct records run concurrently.
struct LockTable {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl LockTable {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, record_id: Uuid) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(record_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Result of a resolved submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// The applied event.
    pub event: Event,
    /// The audit event, when last-write-wins resolved a stale base.
    pub conflict_audit: Option<Event>,
    /// True when the token was already resolved and `event` is the
    /// prior result.
    pub duplicate: bool,
}

impl SubmitOutcome {
    /// The version the submission overwrote, if it conflicted.
    pub fn superseded_version(&self) -> Option<u64> {
        self.conflict_audit.as_ref().and_then(|event| match event.kind {
            EventKind::ConflictResolved { superseded_version } => Some(superseded_version),
            EventKind::Applied => None,
        })
    }
}

/// The only writer path into the store and event log.
pub struct SyncCoordinator {
    config: ServerConfig,
    store: Arc<MemoryStore>,
    broker: Arc<dyn EventBroker>,
    locks: LockTable,
}

impl SyncCoordinator {
    /// Creates a coordinator over a store and a broker.
    pub fn new(config: ServerConfig, store: Arc<MemoryStore>, broker: Arc<dyn EventBroker>) -> Self {
        Self {
            config,
            store,
            broker,
            locks: LockTable::new(),
        }
    }

    /// Resolves one mutation: validate, commit, publish.
    ///
    /// Replaying an already-resolved idempotency token returns the
    /// prior event without touching state.
    pub fn submit(&self, mutation: &Mutation) -> ServerResult<SubmitOutcome> {
        if let Some(event) = self.store.resolved_event(mutation.idempotency_token) {
            debug!(token = %mutation.idempotency_token, "duplicate submission, returning prior event");
            return Ok(SubmitOutcome {
                event,
                conflict_audit: None,
                duplicate: true,
            });
        }

        let lock = self.locks.lock_for(mutation.record_id);
        let _guard = lock.lock();

        // A retry racing its original resolves once the lock is held.
        if let Some(event) = self.store.resolved_event(mutation.idempotency_token) {
            return Ok(SubmitOutcome {
                event,
                conflict_audit: None,
                duplicate: true,
            });
        }

        let current = self.store.record(mutation.record_id);
        let decision = validate(mutation, current.as_ref());
        let (mut record, new_version, superseded) = match (current, decision) {
            (_, Decision::Reject(error)) => return Err(error),
            (Some(record), Decision::Accept { new_version }) => (record, new_version, None),
            (
                Some(record),
                Decision::Conflict {
                    superseded_version,
                    new_version,
                },
            ) => (record, new_version, Some(superseded_version)),
            (None, _) => return Err(ServerError::NotFound(mutation.record_id)),
        };

        let now = crate::now_ms();
        record.apply_fields(&mutation.fields, new_version, now);

        let mut events = vec![Event::applied(record.clone(), mutation.acting_user, now)];
        if let Some(superseded_version) = superseded {
            debug!(
                record_id = %mutation.record_id,
                superseded_version,
                new_version,
                "stale base resolved by last-write-wins"
            );
            events.push(Event::conflict_resolved(
                record.clone(),
                mutation.acting_user,
                now,
                superseded_version,
            ));
        }

        let committed = self.commit_with_retry(record, events, mutation.idempotency_token)?;

        for event in &committed {
            self.publish_with_retry(event);
        }

        let mut committed = committed.into_iter();
        let event = committed.next().ok_or_else(|| {
            ServerError::TransportUnavailable("commit produced no events".into())
        })?;
        let conflict_audit = committed.next();

        debug!(
            record_id = %mutation.record_id,
            version = event.version,
            sequence = event.sequence,
            "mutation accepted"
        );
        Ok(SubmitOutcome {
            event,
            conflict_audit,
            duplicate: false,
        })
    }

    /// Commits with bounded attempts before surfacing unavailability.
    fn commit_with_retry(
        &self,
        record: ripple_protocol::Record,
        events: Vec<Event>,
        token: Uuid,
    ) -> ServerResult<Vec<Event>> {
        let attempts = self.config.commit_attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            match self.store.commit(record.clone(), events.clone(), token) {
                Ok(committed) => return Ok(committed),
                Err(error) if error.is_retryable() => {
                    warn!(attempt, %error, "store commit failed");
                    last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
        Err(last_error
            .unwrap_or_else(|| ServerError::TransportUnavailable("store commit failed".into())))
    }

    /// Publishes a committed event with bounded attempts.
    ///
    /// The event is already durable, so a broker outage is logged
    /// rather than surfaced; subscribers recover through gap-fill
    /// replay at their next subscribe.
    fn publish_with_retry(&self, event: &Event) {
        let attempts = self.config.publish_attempts.max(1);
        for attempt in 0..attempts {
            match self.broker.publish(event) {
                Ok(()) => return,
                Err(error) => {
                    warn!(attempt, sequence = event.sequence, %error, "broker publish failed");
                }
            }
        }
        warn!(
            sequence = event.sequence,
            "broker unreachable, relying on replay to close the gap"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ProcessBroker;
    use ripple_protocol::Record;
    use serde_json::{json, Map};

    fn coordinator() -> (SyncCoordinator, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(ProcessBroker::default());
        let coordinator = SyncCoordinator::new(ServerConfig::default(), Arc::clone(&store), broker);
        (coordinator, store)
    }

    fn seed_record(store: &MemoryStore, version: u64) -> Record {
        let mut record =
            Record::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Map::new(), 0);
        record.version = version;
        store.insert_record(record.clone());
        record
    }

    fn fields(key: &str, value: &str) -> Map<String, serde_json::Value> {
        let mut map = Map::new();
        map.insert(key.into(), json!(value));
        map
    }

    #[test]
    fn clean_accept_bumps_version() {
        let (coordinator, store) = coordinator();
        let record = seed_record(&store, 3);

        let mutation = Mutation::new(
            record.record_id,
            record.list_id,
            3,
            fields("title", "milk"),
            record.owner,
        );
        let outcome = coordinator.submit(&mutation).unwrap();

        assert!(!outcome.duplicate);
        assert!(outcome.conflict_audit.is_none());
        assert_eq!(outcome.event.version, 4);
        assert_eq!(outcome.event.sequence, 1);
        assert_eq!(store.record(record.record_id).unwrap().version, 4);
    }

    #[test]
    fn stale_base_wins_with_audit() {
        // Record at version 3. A mutates on base 3, B still holds 3.
        let (coordinator, store) = coordinator();
        let record = seed_record(&store, 3);

        let a = Mutation::new(
            record.record_id,
            record.list_id,
            3,
            fields("title", "from a"),
            record.owner,
        );
        let b = Mutation::new(
            record.record_id,
            record.list_id,
            3,
            fields("title", "from b"),
            record.owner,
        );

        let outcome_a = coordinator.submit(&a).unwrap();
        assert_eq!(outcome_a.event.version, 4);
        assert!(outcome_a.conflict_audit.is_none());

        let outcome_b = coordinator.submit(&b).unwrap();
        assert_eq!(outcome_b.event.version, 5);
        assert_eq!(outcome_b.superseded_version(), Some(4));

        let audit = outcome_b.conflict_audit.unwrap();
        assert!(audit.is_conflict_audit());
        assert_eq!(audit.version, 5);

        // Both intents are in the log: A's event, B's event, the audit.
        assert_eq!(store.event_count(), 3);
        assert_eq!(store.record(record.record_id).unwrap().version, 5);
        assert_eq!(
            store.record(record.record_id).unwrap().fields.get("title"),
            Some(&json!("from b"))
        );
    }

    #[test]
    fn replayed_token_is_a_no_op() {
        let (coordinator, store) = coordinator();
        let record = seed_record(&store, 1);

        let mutation = Mutation::new(
            record.record_id,
            record.list_id,
            1,
            fields("title", "once"),
            record.owner,
        );

        let first = coordinator.submit(&mutation).unwrap();
        let before = store.event_count();

        let replay = coordinator.submit(&mutation).unwrap();
        assert!(replay.duplicate);
        assert_eq!(replay.event, first.event);
        assert_eq!(store.event_count(), before);
        assert_eq!(store.record(record.record_id).unwrap().version, 2);
    }

    #[test]
    fn missing_record_rejects() {
        let (coordinator, _store) = coordinator();
        let mutation = Mutation::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            Map::new(),
            Uuid::new_v4(),
        );

        let result = coordinator.submit(&mutation);
        assert!(matches!(result, Err(ServerError::NotFound(_))));
    }

    #[test]
    fn stranger_is_denied() {
        let (coordinator, store) = coordinator();
        let record = seed_record(&store, 1);

        let mutation = Mutation::new(
            record.record_id,
            record.list_id,
            1,
            fields("title", "nope"),
            Uuid::new_v4(),
        );

        let result = coordinator.submit(&mutation);
        assert!(matches!(result, Err(ServerError::PermissionDenied { .. })));
        assert_eq!(store.event_count(), 0);
    }

    #[test]
    fn transient_store_failure_is_retried() {
        let (coordinator, store) = coordinator();
        let record = seed_record(&store, 1);
        store.fail_next_commits(2);

        let mutation = Mutation::new(
            record.record_id,
            record.list_id,
            1,
            fields("title", "persistent"),
            record.owner,
        );
        let outcome = coordinator.submit(&mutation).unwrap();
        assert_eq!(outcome.event.version, 2);
    }

    #[test]
    fn exhausted_retries_surface_unavailability() {
        let (coordinator, store) = coordinator();
        let record = seed_record(&store, 1);
        store.fail_next_commits(10);

        let mutation = Mutation::new(
            record.record_id,
            record.list_id,
            1,
            fields("title", "doomed"),
            record.owner,
        );
        let result = coordinator.submit(&mutation);
        assert!(matches!(result, Err(ServerError::TransportUnavailable(_))));
        // Nothing was applied; the caller retries later.
        assert_eq!(store.record(record.record_id).unwrap().version, 1);
    }

    #[test]
    fn concurrent_same_base_submissions_keep_versions_gapless() {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(ProcessBroker::default());
        let coordinator = Arc::new(SyncCoordinator::new(
            ServerConfig::default(),
            Arc::clone(&store),
            broker,
        ));
        let record = seed_record(&store, 1);

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                let record = record.clone();
                std::thread::spawn(move || {
                    let mutation = Mutation::new(
                        record.record_id,
                        record.list_id,
                        1,
                        fields("writer", &i.to_string()),
                        record.owner,
                    );
                    coordinator.submit(&mutation).unwrap()
                })
            })
            .collect();

        let outcomes: Vec<SubmitOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Exactly one clean accept at version 2; the rest conflicted.
        let clean = outcomes.iter().filter(|o| o.conflict_audit.is_none()).count();
        assert_eq!(clean, 1);

        let mut versions: Vec<u64> = outcomes.iter().map(|o| o.event.version).collect();
        versions.sort_unstable();
        assert_eq!(versions, vec![2, 3, 4, 5]);
        assert_eq!(store.record(record.record_id).unwrap().version, 5);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            /// Any interleaving of stale and current bases leaves every
            /// record with gapless versions and the log with strictly
            /// increasing sequences.
            #[test]
            fn versions_gapless_under_arbitrary_bases(
                ops in prop::collection::vec((0usize..3, 0u64..4), 1..40)
            ) {
                let (coordinator, store) = coordinator();
                let records: Vec<Record> =
                    (0..3).map(|_| seed_record(&store, 1)).collect();

                for (index, base_lag) in ops {
                    let record = &records[index];
                    let current = store.record(record.record_id).unwrap().version;
                    let base = current.saturating_sub(base_lag).max(1);
                    let mutation = Mutation::new(
                        record.record_id,
                        record.list_id,
                        base,
                        fields("n", "x"),
                        record.owner,
                    );
                    coordinator.submit(&mutation).unwrap();
                }

                for record in &records {
                    let history = store.history(record.record_id);
                    let applied: Vec<u64> = history
                        .iter()
                        .filter(|e| !e.is_conflict_audit())
                        .map(|e| e.version)
                        .collect();
                    // Strictly increasing by exactly one, starting at 2.
                    for (i, version) in applied.iter().enumerate() {
                        prop_assert_eq!(*version, 2 + i as u64);
                    }
                    prop_assert_eq!(
                        store.record(record.record_id).unwrap().version,
                        1 + applied.len() as u64
                    );
                }

                let all: Vec<u64> = records
                    .iter()
                    .flat_map(|r| store.history(r.record_id))
                    .map(|e| e.sequence)
                    .collect();
                let mut sorted = all.clone();
                sorted.sort_unstable();
                sorted.dedup();
                prop_assert_eq!(sorted.len(), all.len());
            }
        }
    }
}
