//! Per-instance connection registry.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::event_log::LogRead;
use crate::store::MemoryStore;
use parking_lot::RwLock;
use ripple_protocol::{Envelope, Event, ServerMessage};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle state of one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport established, credentials not yet checked.
    Connecting,
    /// Credentials accepted, no subscriptions yet.
    Authenticated,
    /// At least one live subscription.
    Active,
    /// Tearing down; buffered sends may still drain.
    Closing,
    /// Fully torn down.
    Closed,
}

impl ConnectionState {
    /// Returns true while the connection may still interact.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Authenticated | ConnectionState::Active
        )
    }

    /// State name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Active => "active",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        }
    }
}

struct ConnectionEntry {
    user: Option<Uuid>,
    state: ConnectionState,
    /// list_id -> highest sequence already forwarded.
    subscriptions: HashMap<Uuid, u64>,
    sender: mpsc::UnboundedSender<Envelope<ServerMessage>>,
    last_seen_ms: u64,
    closing_since_ms: Option<u64>,
}

impl ConnectionEntry {
    fn enter_closing(&mut self, now_ms: u64) {
        self.state = ConnectionState::Closing;
        self.subscriptions.clear();
        self.closing_since_ms = Some(now_ms);
    }
}

/// Table of this instance's live connections and their subscriptions.
///
/// The table is private per server instance and mutated only by that
/// instance's own connection lifecycle; peer instances are reached
/// exclusively through the broker.
///
/// Server-initiated pushes carry the originating event's sequence as
/// their correlation id; replies triggered by a client request echo
/// the request's correlation id.
pub struct ConnectionRegistry {
    config: ServerConfig,
    store: Arc<MemoryStore>,
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,
}

impl ConnectionRegistry {
    /// Creates a registry reading gap-fill replays from `store`.
    pub fn new(config: ServerConfig, store: Arc<MemoryStore>) -> Self {
        Self {
            config,
            store,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new connection in the `Connecting` state.
    ///
    /// Returns the connection id and the outbound message stream.
    pub fn connect(&self, now_ms: u64) -> (Uuid, mpsc::UnboundedReceiver<Envelope<ServerMessage>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.connections.write().insert(
            id,
            ConnectionEntry {
                user: None,
                state: ConnectionState::Connecting,
                subscriptions: HashMap::new(),
                sender: tx,
                last_seen_ms: now_ms,
                closing_since_ms: None,
            },
        );
        debug!(connection = %id, "connection registered");
        (id, rx)
    }

    /// Moves a connection from `Connecting` to `Authenticated`.
    pub fn mark_authenticated(&self, id: Uuid, user: Uuid, now_ms: u64) -> ServerResult<()> {
        let mut connections = self.connections.write();
        let entry = connections
            .get_mut(&id)
            .ok_or(ServerError::UnknownConnection(id))?;
        if entry.state != ConnectionState::Connecting {
            return Err(ServerError::InvalidTransition {
                from: entry.state.name(),
                to: "authenticated",
            });
        }
        entry.user = Some(user);
        entry.state = ConnectionState::Authenticated;
        entry.last_seen_ms = now_ms;
        debug!(connection = %id, %user, "connection authenticated");
        Ok(())
    }

    /// Returns the authenticated user of a live connection.
    pub fn authenticated_user(&self, id: Uuid) -> ServerResult<Uuid> {
        let connections = self.connections.read();
        let entry = connections
            .get(&id)
            .ok_or(ServerError::UnknownConnection(id))?;
        match (entry.state, entry.user) {
            (ConnectionState::Authenticated | ConnectionState::Active, Some(user)) => Ok(user),
            _ => Err(ServerError::InvalidTransition {
                from: entry.state.name(),
                to: "active",
            }),
        }
    }

    /// Subscribes a connection to a list.
    ///
    /// Events after `last_sequence` are replayed into the outbound
    /// queue before the live stream takes over, closing the race
    /// between the client's snapshot and its subscription. When the
    /// gap reaches behind the retention horizon, or is large enough
    /// that a snapshot is cheaper than replay, `sync_required` is sent
    /// instead.
    pub fn subscribe(
        &self,
        id: Uuid,
        list_id: Uuid,
        last_sequence: u64,
        correlation_id: &str,
        now_ms: u64,
    ) -> ServerResult<()> {
        let mut connections = self.connections.write();
        let entry = connections
            .get_mut(&id)
            .ok_or(ServerError::UnknownConnection(id))?;
        if !matches!(
            entry.state,
            ConnectionState::Authenticated | ConnectionState::Active
        ) {
            return Err(ServerError::InvalidTransition {
                from: entry.state.name(),
                to: "active",
            });
        }

        let mut cursor = last_sequence;
        match self.store.events_since(list_id, last_sequence) {
            LogRead::Events(events) if events.len() <= self.config.max_fetch_batch as usize => {
                for event in events {
                    cursor = cursor.max(event.sequence);
                    let envelope =
                        Envelope::new(ServerMessage::Event(event), correlation_id.to_string());
                    if entry.sender.send(envelope).is_err() {
                        entry.enter_closing(now_ms);
                        return Err(ServerError::UnknownConnection(id));
                    }
                }
            }
            LogRead::Events(events) => {
                debug!(
                    connection = %id,
                    %list_id,
                    backlog = events.len(),
                    "replay larger than one batch, requesting resnapshot"
                );
                cursor = self.store.latest_sequence();
                let envelope = Envelope::new(
                    ServerMessage::SyncRequired { list_id },
                    correlation_id.to_string(),
                );
                let _ = entry.sender.send(envelope);
            }
            LogRead::Gap { archived_through } => {
                debug!(
                    connection = %id,
                    %list_id,
                    archived_through,
                    "gap behind retention horizon, requesting resnapshot"
                );
                cursor = self.store.latest_sequence();
                let envelope = Envelope::new(
                    ServerMessage::SyncRequired { list_id },
                    correlation_id.to_string(),
                );
                let _ = entry.sender.send(envelope);
            }
        }

        entry.subscriptions.insert(list_id, cursor);
        entry.state = ConnectionState::Active;
        entry.last_seen_ms = now_ms;
        Ok(())
    }

    /// Removes one subscription.
    pub fn unsubscribe(&self, id: Uuid, list_id: Uuid) -> ServerResult<()> {
        let mut connections = self.connections.write();
        let entry = connections
            .get_mut(&id)
            .ok_or(ServerError::UnknownConnection(id))?;
        entry.subscriptions.remove(&list_id);
        Ok(())
    }

    /// Fans an event out to this instance's subscribed connections.
    ///
    /// Idempotent per subscription: an event whose sequence is not
    /// greater than the last forwarded sequence is dropped, so
    /// at-least-once broker delivery never duplicates client pushes.
    /// Returns the number of connections the event was forwarded to.
    pub fn deliver(&self, event: &Event) -> usize {
        let mut connections = self.connections.write();
        let mut forwarded = 0;
        let now_ms = crate::now_ms();

        for (id, entry) in connections.iter_mut() {
            if entry.state != ConnectionState::Active {
                continue;
            }
            let Some(last) = entry.subscriptions.get_mut(&event.list_id) else {
                continue;
            };
            if event.sequence <= *last {
                continue;
            }

            let envelope = Envelope::new(
                ServerMessage::Event(event.clone()),
                event.sequence.to_string(),
            );
            if entry.sender.send(envelope).is_ok() {
                *last = event.sequence;
                forwarded += 1;
            } else {
                warn!(connection = %id, "outbound channel gone, closing connection");
                entry.enter_closing(now_ms);
            }
        }
        forwarded
    }

    /// Pushes a message to one connection, echoing a correlation id.
    pub fn push_to(
        &self,
        id: Uuid,
        message: ServerMessage,
        correlation_id: &str,
    ) -> ServerResult<()> {
        let mut connections = self.connections.write();
        let entry = connections
            .get_mut(&id)
            .ok_or(ServerError::UnknownConnection(id))?;
        let envelope = Envelope::new(message, correlation_id.to_string());
        if entry.sender.send(envelope).is_err() {
            entry.enter_closing(crate::now_ms());
            return Err(ServerError::UnknownConnection(id));
        }
        Ok(())
    }

    /// Records a client heartbeat.
    pub fn heartbeat(&self, id: Uuid, now_ms: u64) -> ServerResult<()> {
        let mut connections = self.connections.write();
        let entry = connections
            .get_mut(&id)
            .ok_or(ServerError::UnknownConnection(id))?;
        if !entry.state.is_live() {
            return Err(ServerError::InvalidTransition {
                from: entry.state.name(),
                to: entry.state.name(),
            });
        }
        entry.last_seen_ms = now_ms;
        Ok(())
    }

    /// Starts closing a connection (client close or transport error).
    pub fn begin_close(&self, id: Uuid, now_ms: u64) -> ServerResult<()> {
        let mut connections = self.connections.write();
        let entry = connections
            .get_mut(&id)
            .ok_or(ServerError::UnknownConnection(id))?;
        entry.enter_closing(now_ms);
        debug!(connection = %id, "connection closing");
        Ok(())
    }

    /// Advances connection lifecycles against the clock.
    ///
    /// Connections silent past the idle window start closing;
    /// closing connections whose grace deadline elapsed, or whose
    /// receiver is gone, become `Closed` and are removed. Returns the
    /// number of connections removed.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let idle_ms = self.config.idle_timeout.as_millis() as u64;
        let grace_ms = self.config.close_grace.as_millis() as u64;
        let mut connections = self.connections.write();

        for (id, entry) in connections.iter_mut() {
            if entry.state.is_live() && now_ms.saturating_sub(entry.last_seen_ms) > idle_ms {
                warn!(connection = %id, "idle past heartbeat window, closing");
                entry.enter_closing(now_ms);
            }
        }

        let before = connections.len();
        connections.retain(|id, entry| {
            if entry.state != ConnectionState::Closing {
                return true;
            }
            let drained = entry.sender.is_closed()
                || entry
                    .closing_since_ms
                    .is_some_and(|since| now_ms.saturating_sub(since) >= grace_ms);
            if drained {
                entry.state = ConnectionState::Closed;
                debug!(connection = %id, "connection closed");
            }
            entry.state != ConnectionState::Closed
        });
        before - connections.len()
    }

    /// Returns the current state of a connection, if registered.
    pub fn state_of(&self, id: Uuid) -> Option<ConnectionState> {
        self.connections.read().get(&id).map(|entry| entry.state)
    }

    /// Returns the last forwarded sequence for one subscription.
    pub fn subscription_cursor(&self, id: Uuid, list_id: Uuid) -> Option<u64> {
        self.connections
            .read()
            .get(&id)
            .and_then(|entry| entry.subscriptions.get(&list_id).copied())
    }

    /// Returns the number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}
