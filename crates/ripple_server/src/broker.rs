//! Cross-instance event fan-out.

use crate::error::ServerResult;
use ripple_protocol::Event;
use tokio::sync::broadcast;

/// Broadcast channel making accepted events visible to every server
/// instance, not only the one that accepted them.
///
/// Delivery contract implementations must honor:
/// - at-least-once: consumers deduplicate by sequence, so duplicate
///   delivery of one event must be harmless;
/// - events of one list arrive in sequence order;
/// - no ordering guarantee across lists or records.
pub trait EventBroker: Send + Sync {
    /// Publishes an accepted event to all instances.
    fn publish(&self, event: &Event) -> ServerResult<()>;

    /// Opens a subscription carrying every published event.
    ///
    /// Instances filter locally through their connection registry
    /// rather than managing per-list broker subscriptions.
    fn subscribe(&self) -> broadcast::Receiver<Event>;
}

/// In-process broker over a `tokio::sync::broadcast` channel.
///
/// A single process-wide channel trivially preserves publish order,
/// which subsumes the per-list ordering requirement. Receivers that
/// fall behind observe a lag and recover through subscribe-time
/// gap-fill replay.
pub struct ProcessBroker {
    tx: broadcast::Sender<Event>,
}

impl ProcessBroker {
    /// Creates a broker with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of live subscriptions.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ProcessBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBroker for ProcessBroker {
    fn publish(&self, event: &Event) -> ServerResult<()> {
        // An instance pool with no subscribers yet is not a failure.
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
