//! Queue lifecycle events delivered to an `EventSink`.

use serde::{Deserialize, Serialize};

use super::ids::OperationId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Enqueued {
        id: OperationId,
        op_type: String,
    },

    /// Handler succeeded and the operation was removed. `attempts` counts
    /// the successful execution.
    Delivered {
        id: OperationId,
        op_type: String,
        attempts: u32,
    },

    /// Handler failed; the operation will be retried after backoff.
    AttemptFailed {
        id: OperationId,
        op_type: String,
        attempts: u32,
        error: String,
    },

    /// Retries used up. Emitted once, on the attempt that hit the ceiling.
    Exhausted {
        id: OperationId,
        op_type: String,
        attempts: u32,
        error: String,
    },

    /// No handler registered for the type. Emitted once per operation.
    Stalled {
        id: OperationId,
        op_type: String,
    },

    /// The operation was removed while its handler was running; the outcome was dropped.
    Discarded {
        id: OperationId,
        op_type: String,
    },
}

impl QueueEvent {
    pub fn id(&self) -> OperationId {
        match self {
            QueueEvent::Enqueued { id, .. }
            | QueueEvent::Delivered { id, .. }
            | QueueEvent::AttemptFailed { id, .. }
            | QueueEvent::Exhausted { id, .. }
            | QueueEvent::Stalled { id, .. }
            | QueueEvent::Discarded { id, .. } => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn events_are_tagged_snake_case() {
        let event = QueueEvent::Stalled {
            id: OperationId::from_ulid(Ulid::new()),
            op_type: "createTask".to_string(),
        };
        let v = serde_json::to_value(&event).unwrap();
        assert_eq!(v["event"], "stalled");
        assert_eq!(v["op_type"], "createTask");
    }
}
