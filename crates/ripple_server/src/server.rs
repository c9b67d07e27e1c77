//! Server facade wiring the sync core together.

use crate::auth::{AuthConfig, TokenValidator};
use crate::broker::{EventBroker, ProcessBroker};
use crate::config::ServerConfig;
use crate::coordinator::{SubmitOutcome, SyncCoordinator};
use crate::error::{ServerError, ServerResult};
use crate::event_log::LogRead;
use crate::registry::ConnectionRegistry;
use crate::store::MemoryStore;
use ripple_protocol::{
    ApiResponse, ClientMessage, Envelope, Event, FetchData, Mutation, ServerMessage,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;
use uuid::Uuid;

/// One sync server instance.
///
/// Instances are stateless apart from their private connection
/// registry: they share the store (source of truth) and the broker
/// (cross-instance fan-out), so a pool of them can be wired over the
/// same pair.
pub struct SyncServer {
    config: ServerConfig,
    store: Arc<MemoryStore>,
    coordinator: SyncCoordinator,
    broker: Arc<dyn EventBroker>,
    registry: Arc<ConnectionRegistry>,
    validator: Option<TokenValidator>,
}

impl SyncServer {
    /// Creates a standalone instance with its own store and broker.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let broker: Arc<dyn EventBroker> = Arc::new(ProcessBroker::default());
        Self::with_parts(config, store, broker)
    }

    /// Creates an instance over a shared store and broker.
    ///
    /// This is how a horizontally scaled pool is assembled: every
    /// instance gets the same store and broker, and keeps its own
    /// registry.
    pub fn with_parts(
        config: ServerConfig,
        store: Arc<MemoryStore>,
        broker: Arc<dyn EventBroker>,
    ) -> Self {
        let validator = match (config.require_auth, &config.auth_secret) {
            (true, Some(secret)) => Some(TokenValidator::new(AuthConfig::new(secret.clone()))),
            _ => None,
        };
        let coordinator =
            SyncCoordinator::new(config.clone(), Arc::clone(&store), Arc::clone(&broker));
        let registry = Arc::new(ConnectionRegistry::new(config.clone(), Arc::clone(&store)));
        Self {
            config,
            store,
            coordinator,
            broker,
            registry,
            validator,
        }
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Returns this instance's connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns the highest sequence in the event log.
    pub fn latest_sequence(&self) -> u64 {
        self.store.latest_sequence()
    }

    /// Accepts a new connection; returns its id and outbound stream.
    pub fn connect(&self) -> (Uuid, mpsc::UnboundedReceiver<Envelope<ServerMessage>>) {
        self.registry.connect(crate::now_ms())
    }

    /// Runs the credential check for a connection.
    ///
    /// With auth enabled the token must be a signed token from
    /// [`TokenValidator::issue`]; without it, the raw user id bytes
    /// stand in for a credential.
    pub fn authenticate(&self, connection: Uuid, token: &[u8]) -> ServerResult<Uuid> {
        let now = crate::now_ms();
        let user = match &self.validator {
            Some(validator) => validator.verify(token, now)?,
            None => Uuid::from_slice(token)
                .map_err(|_| ServerError::NotAuthorized("expected a user id".into()))?,
        };
        self.registry.mark_authenticated(connection, user, now)?;
        Ok(user)
    }

    /// Dispatches one message from a connection.
    ///
    /// Mutations are attributed to the connection's authenticated
    /// user regardless of what the payload claims. A conflict outcome
    /// is pushed back to the submitter with the request's correlation
    /// id; the resulting events reach it through its subscriptions
    /// like everyone else's.
    pub fn handle_message(
        &self,
        connection: Uuid,
        envelope: Envelope<ClientMessage>,
    ) -> ServerResult<()> {
        let now = crate::now_ms();
        match envelope.message {
            ClientMessage::Subscribe {
                list_id,
                last_sequence,
            } => self.registry.subscribe(
                connection,
                list_id,
                last_sequence,
                &envelope.correlation_id,
                now,
            ),
            ClientMessage::Unsubscribe { list_id } => {
                self.registry.unsubscribe(connection, list_id)
            }
            ClientMessage::Mutate(mutation) => {
                let user = self.registry.authenticated_user(connection)?;
                let mutation = Mutation {
                    acting_user: user,
                    ..mutation
                };
                let outcome = self.coordinator.submit(&mutation)?;
                if let Some(superseded_version) = outcome.superseded_version() {
                    self.registry.push_to(
                        connection,
                        ServerMessage::Conflict {
                            superseded_version,
                            winning_event: outcome.event.clone(),
                        },
                        &envelope.correlation_id,
                    )?;
                }
                Ok(())
            }
        }
    }

    /// Records a heartbeat for a connection.
    pub fn heartbeat(&self, connection: Uuid) -> ServerResult<()> {
        self.registry.heartbeat(connection, crate::now_ms())
    }

    /// Starts closing a connection on explicit client close.
    pub fn close(&self, connection: Uuid) -> ServerResult<()> {
        self.registry.begin_close(connection, crate::now_ms())
    }

    /// Advances connection lifecycles against the clock.
    pub fn sweep(&self) -> usize {
        self.registry.sweep(crate::now_ms())
    }

    /// Fallback mutation submission for clients without a connection.
    pub fn submit_mutation(&self, mutation: &Mutation) -> ApiResponse<Event> {
        let now = crate::now_ms();
        match self.coordinator.submit(mutation) {
            Ok(SubmitOutcome { event, .. }) => {
                let version = event.version;
                ApiResponse::ok(event, Some(version), now)
            }
            Err(error) => ApiResponse::fail(error.code(), error.to_string(), None, now),
        }
    }

    /// Fallback list retrieval with incremental catch-up.
    ///
    /// `since_sequence` asks for events after that sequence; when it
    /// is absent, reaches behind the retention horizon, or the backlog
    /// exceeds one batch, the full record snapshot is returned
    /// instead.
    pub fn fetch_list(&self, list_id: Uuid, since_sequence: Option<u64>) -> ApiResponse<FetchData> {
        let now = crate::now_ms();
        let latest = self.store.latest_sequence();

        let data = match since_sequence {
            Some(after) => match self.store.events_since(list_id, after) {
                LogRead::Events(events)
                    if events.len() <= self.config.max_fetch_batch as usize =>
                {
                    FetchData::incremental(events, latest)
                }
                _ => FetchData::snapshot(self.store.list_records(list_id), latest),
            },
            None => FetchData::snapshot(self.store.list_records(list_id), latest),
        };
        ApiResponse::ok(data, None, now)
    }

    /// Spawns the pump feeding broker events into this instance's
    /// registry. One task per instance.
    pub fn spawn_fanout(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.broker.subscribe();
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        registry.deliver(&event);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Registry cursors dedupe; subscribers close
                        // real gaps via replay on resubscribe.
                        warn!(missed, "fan-out lagged behind the broker");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
