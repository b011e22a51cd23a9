//! EventSink implementations: fan-out channel and structured logging.

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::domain::QueueEvent;
use crate::ports::EventSink;

/// Publishes events on a broadcast channel. Slow subscribers lag and drop
/// the oldest events instead of blocking the processing loop.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<QueueEvent>,
}

impl BroadcastEventSink {
    /// Channel holding up to `capacity` undelivered events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: QueueEvent) {
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}

/// Logs every event through `tracing`. Stuck operations log at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: QueueEvent) {
        match &event {
            QueueEvent::Exhausted {
                id,
                op_type,
                attempts,
                error,
            } => warn!(op_id = %id, op_type = %op_type, attempts, error = %error, "operation exhausted its retries"),
            QueueEvent::Stalled { id, op_type } => {
                warn!(op_id = %id, op_type = %op_type, "operation stalled: no handler registered")
            }
            other => info!(op_id = %other.id(), event = ?other, "queue event"),
        }
    }
}
