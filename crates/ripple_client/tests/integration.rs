//! Integration tests: reconciliation engine against a real server.

use ripple_client::{
    BackoffConfig, ClientConfig, ClientError, ClientResult, ReconcileEngine, SyncTransport,
};
use ripple_protocol::{Event, FetchData, Mutation, Record};
use ripple_server::{ServerConfig, SyncServer};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// A transport that calls the server's fallback surface directly.
struct InMemoryTransport {
    server: Arc<SyncServer>,
}

impl InMemoryTransport {
    fn new(server: Arc<SyncServer>) -> Self {
        Self { server }
    }
}

impl SyncTransport for InMemoryTransport {
    fn submit(&self, mutation: &Mutation) -> ClientResult<Event> {
        let response = self.server.submit_mutation(mutation);
        match (response.data, response.error) {
            (Some(event), _) => Ok(event),
            (None, Some(error)) => Err(ClientError::from_api(error)),
            _ => Err(ClientError::Protocol("empty response".into())),
        }
    }

    fn fetch(&self, list_id: Uuid, since: Option<u64>) -> ClientResult<FetchData> {
        let response = self.server.fetch_list(list_id, since);
        match (response.data, response.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(ClientError::from_api(error)),
            _ => Err(ClientError::Protocol("empty response".into())),
        }
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn fields(value: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("title".into(), json!(value));
    map
}

fn seed_record(server: &SyncServer, list_id: Uuid, owner: Uuid, version: u64) -> Record {
    let mut record = Record::new(Uuid::new_v4(), list_id, owner, Map::new(), 0);
    record.version = version;
    server.store().insert_record(record.clone());
    record
}

fn engine_for(
    server: &Arc<SyncServer>,
    list_id: Uuid,
    user: Uuid,
) -> ReconcileEngine<InMemoryTransport> {
    let config = ClientConfig::new(user)
        .track_list(list_id)
        .with_backoff(BackoffConfig::no_retry());
    ReconcileEngine::new(config, InMemoryTransport::new(Arc::clone(server)))
}

#[test]
fn offline_queue_replays_after_reconnection() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let list_id = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let record = seed_record(&server, list_id, owner, 3);

    // Our client cached the record at version 3, then went offline
    // and queued two edits.
    let engine = engine_for(&server, list_id, owner);
    engine.shadow().insert_baseline(record.clone());
    engine.enqueue(record.record_id, fields("offline edit 1")).unwrap();
    engine.enqueue(record.record_id, fields("offline edit 2")).unwrap();
    assert_eq!(engine.pending_count(), 2);

    // Meanwhile another client moved the record to version 5.
    let other = InMemoryTransport::new(Arc::clone(&server));
    other
        .submit(&Mutation::new(record.record_id, list_id, 3, fields("elsewhere 1"), owner))
        .unwrap();
    other
        .submit(&Mutation::new(record.record_id, list_id, 4, fields("elsewhere 2"), owner))
        .unwrap();
    assert_eq!(server.store().record(record.record_id).unwrap().version, 5);

    // Reconnection: fetch discovers version 5, then the queue replays
    // on top of it, producing versions 6 and 7. Nothing is lost.
    let result = engine.reconcile().unwrap();
    assert!(result.success);
    assert_eq!(result.fetched, 2);
    assert_eq!(result.replayed, 2);
    assert_eq!(engine.pending_count(), 0);

    let final_record = server.store().record(record.record_id).unwrap();
    assert_eq!(final_record.version, 7);
    assert_eq!(final_record.fields.get("title"), Some(&json!("offline edit 2")));
    assert_eq!(engine.shadow().version_of(record.record_id), Some(7));
}

#[test]
fn stale_submission_resolves_as_conflict_with_audit() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let list_id = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let record = seed_record(&server, list_id, owner, 3);
    let transport = InMemoryTransport::new(Arc::clone(&server));

    // Client A commits on base 3.
    let accepted = transport
        .submit(&Mutation::new(record.record_id, list_id, 3, fields("from a"), owner))
        .unwrap();
    assert_eq!(accepted.version, 4);

    // Client B, still holding 3, submits: last-write-wins, with the
    // overwrite recorded for the activity trail.
    let winning = transport
        .submit(&Mutation::new(record.record_id, list_id, 3, fields("from b"), owner))
        .unwrap();
    assert_eq!(winning.version, 5);

    let history = server.store().history(record.record_id);
    assert_eq!(history.len(), 3);
    let audit = history.iter().find(|e| e.is_conflict_audit()).unwrap();
    assert_eq!(audit.version, 5);
    assert_eq!(
        audit.kind,
        ripple_protocol::EventKind::ConflictResolved {
            superseded_version: 4
        }
    );
}

#[test]
fn idempotent_retry_returns_prior_event() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let list_id = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let record = seed_record(&server, list_id, owner, 1);
    let transport = InMemoryTransport::new(Arc::clone(&server));

    let mutation = Mutation::new(record.record_id, list_id, 1, fields("once"), owner);

    let first = transport.submit(&mutation).unwrap();
    let events_before = server.store().event_count();

    // A flaky connection retries the identical submission.
    let replayed = transport.submit(&mutation).unwrap();
    assert_eq!(replayed, first);
    assert_eq!(server.store().event_count(), events_before);
    assert_eq!(server.store().record(record.record_id).unwrap().version, 2);
}

#[test]
fn initial_snapshot_then_incremental_catchup() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let list_id = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let record = seed_record(&server, list_id, owner, 1);

    // First reconcile of a fresh client: nothing cached, so the list
    // loads from a snapshot.
    let engine = engine_for(&server, list_id, owner);
    let result = engine.reconcile().unwrap();
    assert_eq!(result.resnapshots, 1);
    assert_eq!(engine.shadow().version_of(record.record_id), Some(1));

    // Someone else edits; the next reconcile catches up incrementally.
    let other = InMemoryTransport::new(Arc::clone(&server));
    other
        .submit(&Mutation::new(record.record_id, list_id, 1, fields("newer"), owner))
        .unwrap();

    let result = engine.reconcile().unwrap();
    assert_eq!(result.resnapshots, 0);
    assert_eq!(result.fetched, 1);
    assert_eq!(engine.shadow().version_of(record.record_id), Some(2));
}

#[test]
fn rejected_queue_entry_is_dropped_and_rolled_back() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let list_id = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let record = seed_record(&server, list_id, owner, 2);

    // The stranger cached the record but has no write permission.
    let engine = engine_for(&server, list_id, stranger);
    engine.shadow().insert_baseline(record.clone());
    engine.enqueue(record.record_id, fields("not yours")).unwrap();

    let result = engine.reconcile().unwrap();
    assert!(result.success);
    assert_eq!(result.rejected.len(), 1);
    assert_eq!(result.rejected[0].code, "permission_denied");
    assert_eq!(engine.pending_count(), 0);

    // Server state untouched, local guess rolled back.
    assert_eq!(server.store().record(record.record_id).unwrap().version, 2);
    assert_eq!(engine.shadow().version_of(record.record_id), Some(2));
    assert!(!engine.shadow().is_pending(record.record_id));
}

#[test]
fn persisted_queue_replays_after_restart() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let list_id = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let record = seed_record(&server, list_id, owner, 1);

    // The app restarted: the queue comes back from local storage, the
    // shadow cache does not.
    let persisted = vec![Mutation::new(
        record.record_id,
        list_id,
        1,
        fields("written before restart"),
        owner,
    )];
    let config = ClientConfig::new(owner)
        .track_list(list_id)
        .with_backoff(BackoffConfig::no_retry());
    let engine = ReconcileEngine::with_queue(
        config,
        InMemoryTransport::new(Arc::clone(&server)),
        ripple_client::OfflineQueue::from_pending(persisted),
    );
    assert_eq!(engine.pending_count(), 1);

    let result = engine.reconcile().unwrap();
    assert_eq!(result.resnapshots, 1);
    assert_eq!(result.replayed, 1);
    assert_eq!(engine.pending_count(), 0);
    assert_eq!(server.store().record(record.record_id).unwrap().version, 2);
}

#[test]
fn retention_gap_forces_resnapshot_on_fetch() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let list_id = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let record = seed_record(&server, list_id, owner, 1);
    let transport = InMemoryTransport::new(Arc::clone(&server));

    // Build up history, then archive most of it away.
    for version in 1..=4 {
        transport
            .submit(&Mutation::new(
                record.record_id,
                list_id,
                version,
                fields(&format!("v{version}")),
                owner,
            ))
            .unwrap();
    }
    server.store().archive_up_to(3);

    // The engine cached the record long ago, before the horizon.
    let engine = engine_for(&server, list_id, owner);
    engine.shadow().insert_baseline(record.clone());
    engine.shadow().advance_cursor(list_id, 1);

    let result = engine.reconcile().unwrap();
    assert_eq!(result.resnapshots, 1);
    assert_eq!(engine.shadow().version_of(record.record_id), Some(5));
}
