//! EventSink port - queue lifecycle notifications.
//!
//! The queue never pushes outcomes to enqueuing callers. Observers that need
//! to react to "delivered" or "stuck" plug in a sink instead of polling stats.

use crate::domain::QueueEvent;

pub trait EventSink: Send + Sync {
    /// Must not block: called from inside the processing loop.
    fn emit(&self, event: QueueEvent);
}

/// Discards everything. The default sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: QueueEvent) {}
}

/// Delivers to both sinks, left first.
impl<A: EventSink, B: EventSink> EventSink for (A, B) {
    fn emit(&self, event: QueueEvent) {
        self.0.emit(event.clone());
        self.1.emit(event);
    }
}
