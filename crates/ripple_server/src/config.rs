//! Server configuration.

use std::time::Duration;

/// Configuration for the sync core.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interval at which clients are expected to send heartbeats.
    pub heartbeat_interval: Duration,
    /// Silence window after which a connection is considered dead.
    pub idle_timeout: Duration,
    /// How long a closing connection may linger to drain sends.
    pub close_grace: Duration,
    /// Maximum events returned by one fetch or replay batch.
    pub max_fetch_batch: u32,
    /// Attempts for a store commit before surfacing unavailability.
    pub commit_attempts: u32,
    /// Attempts for a broker publish of an already-durable event.
    pub publish_attempts: u32,
    /// Whether connections must present a signed token.
    pub require_auth: bool,
    /// Secret key for token validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
}

impl ServerConfig {
    /// Creates a configuration with the documented defaults.
    pub fn new() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            close_grace: Duration::from_secs(5),
            max_fetch_batch: 500,
            commit_attempts: 3,
            publish_attempts: 3,
            require_auth: false,
            auth_secret: None,
        }
    }

    /// Sets the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the grace period for draining closing connections.
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Sets the maximum fetch/replay batch size.
    pub fn with_max_fetch_batch(mut self, size: u32) -> Self {
        self.max_fetch_batch = size;
        self
    }

    /// Sets the bounded commit retry attempts.
    pub fn with_commit_attempts(mut self, attempts: u32) -> Self {
        self.commit_attempts = attempts;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
