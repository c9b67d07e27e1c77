//! Configuration for the reconciliation engine.

use std::time::Duration;
use uuid::Uuid;

/// Configuration for client-side reconciliation.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// The acting user all queued mutations are attributed to.
    pub user: Uuid,
    /// Lists this client caches and reconciles.
    pub tracked_lists: Vec<Uuid>,
    /// Queue entries replayed per batch.
    pub replay_batch: u32,
    /// Reconnection backoff schedule.
    pub backoff: BackoffConfig,
}

impl ClientConfig {
    /// Creates a configuration for one user.
    pub fn new(user: Uuid) -> Self {
        Self {
            user,
            tracked_lists: Vec::new(),
            replay_batch: 50,
            backoff: BackoffConfig::default(),
        }
    }

    /// Adds a list to track.
    pub fn track_list(mut self, list_id: Uuid) -> Self {
        self.tracked_lists.push(list_id);
        self
    }

    /// Sets the replay batch size.
    pub fn with_replay_batch(mut self, size: u32) -> Self {
        self.replay_batch = size;
        self
    }

    /// Sets the backoff schedule.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Exponential reconnection backoff: 1s, 2s, 4s, 8s, 16s, capped.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Maximum reconnection attempts per reconcile call.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Ceiling for the doubled delays.
    pub max_delay: Duration,
}

impl BackoffConfig {
    /// Creates a backoff schedule with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    /// Creates a schedule that never waits (single attempt).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay ceiling.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Returns the delay before the given attempt (0-indexed).
    ///
    /// The first attempt runs immediately; each subsequent delay
    /// doubles until it reaches the ceiling.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let doubled = self
            .initial_delay
            .saturating_mul(1u32 << (attempt - 1).min(31));
        doubled.min(self.max_delay)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(6)
    }
}
