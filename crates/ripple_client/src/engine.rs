//! Reconciliation engine state machine.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::queue::OfflineQueue;
use crate::shadow::ShadowCache;
use crate::transport::SyncTransport;
use parking_lot::{Mutex, RwLock};
use ripple_protocol::Mutation;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// The current state of the reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    /// Engine is idle, not reconciling.
    Idle,
    /// Engine is fetching authoritative events.
    Fetching,
    /// Engine is replaying the offline queue.
    Replaying,
    /// Engine has completed a reconcile cycle.
    Synced,
    /// Engine encountered an error.
    Error,
    /// Engine is waiting out the reconnection backoff.
    RetryWait,
}

impl ReconcileState {
    /// Returns true if the engine is in an active reconcile phase.
    pub fn is_active(&self) -> bool {
        matches!(self, ReconcileState::Fetching | ReconcileState::Replaying)
    }

    /// Returns true if the engine can start a new cycle.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            ReconcileState::Idle | ReconcileState::Synced | ReconcileState::Error
        )
    }
}

/// Statistics across reconcile cycles.
#[derive(Debug, Clone, Default)]
pub struct ReconcileStats {
    /// Completed cycles.
    pub cycles_completed: u64,
    /// Authoritative events applied to the shadow.
    pub events_applied: u64,
    /// Queued mutations replayed successfully.
    pub mutations_replayed: u64,
    /// Queued mutations dropped after a definitive rejection.
    pub mutations_rejected: u64,
    /// Conflict-audit events observed in fetched history.
    pub conflicts_observed: u64,
    /// Backoff retries taken.
    pub retries: u64,
    /// Last error message.
    pub last_error: Option<String>,
}

/// A queue entry dropped during replay.
#[derive(Debug, Clone)]
pub struct RejectedMutation {
    /// The entry's idempotency token.
    pub token: Uuid,
    /// The record it targeted.
    pub record_id: Uuid,
    /// The server's rejection code.
    pub code: String,
}

/// Result of one reconcile cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleResult {
    /// Events applied during the fetch phase.
    pub fetched: u64,
    /// Queue entries replayed and acknowledged.
    pub replayed: u64,
    /// Lists reloaded from a full snapshot.
    pub resnapshots: u64,
    /// Queue entries dropped after rejection.
    pub rejected: Vec<RejectedMutation>,
    /// Whether the cycle completed.
    pub success: bool,
}

/// Client-side reconciliation: fetch authoritative state, then replay
/// the offline queue against it.
///
/// The engine mirrors the server's last-write-wins policy locally for
/// immediate UI feedback, but the server's decision is authoritative:
/// every returned event replaces the local guess.
pub struct ReconcileEngine<T: SyncTransport> {
    config: ClientConfig,
    transport: Arc<T>,
    queue: Mutex<OfflineQueue>,
    shadow: ShadowCache,
    state: RwLock<ReconcileState>,
    stats: RwLock<ReconcileStats>,
    cancelled: AtomicBool,
}

impl<T: SyncTransport> ReconcileEngine<T> {
    /// Creates a new engine.
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self {
            config,
            transport: Arc::new(transport),
            queue: Mutex::new(OfflineQueue::new()),
            shadow: ShadowCache::new(),
            state: RwLock::new(ReconcileState::Idle),
            stats: RwLock::new(ReconcileStats::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Restores an engine around a persisted offline queue.
    pub fn with_queue(config: ClientConfig, transport: T, queue: OfflineQueue) -> Self {
        let engine = Self::new(config, transport);
        *engine.queue.lock() = queue;
        engine
    }

    /// The local record cache the UI renders from.
    pub fn shadow(&self) -> &ShadowCache {
        &self.shadow
    }

    /// Gets the current state.
    pub fn state(&self) -> ReconcileState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> ReconcileStats {
        self.stats.read().clone()
    }

    /// Returns the number of unacknowledged queued mutations.
    pub fn pending_count(&self) -> usize {
        self.queue.lock().pending_count()
    }

    /// Cancels an ongoing reconcile from another thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Resets the cancelled flag.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> ClientResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(ClientError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: ReconcileState) {
        *self.state.write() = state;
    }

    /// Queues a change made while offline (or awaiting confirmation).
    ///
    /// The mutation is based on the shadow's current version, applied
    /// optimistically for the UI, and replayed on the next reconcile.
    /// Returns its idempotency token.
    pub fn enqueue(&self, record_id: Uuid, fields: Map<String, Value>) -> ClientResult<Uuid> {
        let record = self
            .shadow
            .record(record_id)
            .ok_or(ClientError::UnknownRecord(record_id))?;

        let mutation = Mutation::new(
            record_id,
            record.list_id,
            record.version,
            fields,
            self.config.user,
        );
        let token = mutation.idempotency_token;

        self.shadow.apply_optimistic(&mutation, crate::now_ms())?;
        self.queue.lock().enqueue(mutation);
        debug!(%record_id, %token, "mutation queued");
        Ok(token)
    }

    /// Performs one reconcile cycle: fetch, then replay.
    pub fn reconcile(&self) -> ClientResult<CycleResult> {
        self.reset_cancel();

        if !self.state().can_start() {
            return Err(ClientError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: "reconcile".into(),
            });
        }

        let mut result = CycleResult::default();

        self.set_state(ReconcileState::Fetching);
        for list_id in self.config.tracked_lists.clone() {
            if let Err(error) = self.check_cancelled().and_then(|()| self.fetch_list(list_id, &mut result)) {
                self.handle_error(&error);
                return Err(error);
            }
        }

        self.set_state(ReconcileState::Replaying);
        if let Err(error) = self.replay_queue(&mut result) {
            self.handle_error(&error);
            return Err(error);
        }

        result.success = true;
        self.set_state(ReconcileState::Synced);

        let mut stats = self.stats.write();
        stats.cycles_completed += 1;
        stats.events_applied += result.fetched;
        stats.mutations_replayed += result.replayed;
        stats.last_error = None;

        Ok(result)
    }

    /// Reconciles with exponential reconnection backoff.
    pub fn reconcile_with_retry(&self) -> ClientResult<CycleResult> {
        let backoff = self.config.backoff.clone();
        let mut last_error = None;

        for attempt in 0..backoff.max_attempts {
            if attempt > 0 {
                self.set_state(ReconcileState::RetryWait);
                std::thread::sleep(backoff.delay_for_attempt(attempt));
                self.stats.write().retries += 1;
            }

            self.check_cancelled()?;

            match self.reconcile() {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if error.is_retryable() && attempt + 1 < backoff.max_attempts {
                        debug!(attempt, %error, "reconcile failed, backing off");
                        last_error = Some(error);
                        continue;
                    }
                    return Err(error);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ClientError::Protocol("no reconcile attempts made".into())))
    }

    /// Brings one list's shadow up to authoritative state.
    fn fetch_list(&self, list_id: Uuid, result: &mut CycleResult) -> ClientResult<()> {
        let cursor = self.shadow.last_sequence(list_id);
        // A list never seen locally starts from a snapshot; events
        // alone cannot surface records that predate the log window.
        let since = if cursor == 0 && self.shadow.list_records(list_id).is_empty() {
            None
        } else {
            Some(cursor)
        };

        let data = self.transport.fetch(list_id, since)?;

        if let Some(records) = data.snapshot {
            debug!(%list_id, records = records.len(), "loading snapshot");
            self.shadow.replace_list(list_id, records, data.latest_sequence);
            result.resnapshots += 1;
        } else {
            for event in &data.events {
                if event.is_conflict_audit() {
                    self.stats.write().conflicts_observed += 1;
                }
                self.shadow.apply_authoritative(event);
                result.fetched += 1;
            }
            self.shadow.advance_cursor(list_id, data.latest_sequence);
        }
        Ok(())
    }

    /// Replays the offline queue FIFO against the fetched baseline.
    fn replay_queue(&self, result: &mut CycleResult) -> ClientResult<()> {
        loop {
            let batch = self
                .queue
                .lock()
                .pending_batch(self.config.replay_batch as usize);
            if batch.is_empty() {
                break;
            }

            for mutation in batch {
                self.check_cancelled()?;

                // Rebase onto the shadow's current version: the local
                // mutation wins locally, and the token keeps the
                // submission idempotent across rebased retries.
                let rebased = match self.shadow.version_of(mutation.record_id) {
                    Some(version) => mutation.rebased(version),
                    None => mutation,
                };
                let _ = self.shadow.apply_optimistic(&rebased, crate::now_ms());

                match self.transport.submit(&rebased) {
                    Ok(event) => {
                        self.shadow.apply_authoritative(&event);
                        self.queue.lock().acknowledge(rebased.idempotency_token);
                        result.replayed += 1;
                    }
                    Err(error) if error.is_fatal_rejection() => {
                        warn!(
                            record_id = %rebased.record_id,
                            %error,
                            "queued mutation rejected, rolling back"
                        );
                        self.shadow.rollback(rebased.record_id);
                        self.queue.lock().discard(rebased.idempotency_token);
                        let code = match &error {
                            ClientError::Rejected { code, .. } => code.clone(),
                            _ => "rejected".into(),
                        };
                        result.rejected.push(RejectedMutation {
                            token: rebased.idempotency_token,
                            record_id: rebased.record_id,
                            code,
                        });
                        self.stats.write().mutations_rejected += 1;
                    }
                    // Transport trouble: keep the entry for the next
                    // attempt and surface the failure.
                    Err(error) => return Err(error),
                }
            }

            self.queue.lock().compact();
        }
        Ok(())
    }

    fn handle_error(&self, error: &ClientError) {
        self.set_state(ReconcileState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }
}
