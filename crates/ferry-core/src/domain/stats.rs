use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Introspection snapshot of the queue.
///
/// `total > 0` means "pending sync"; `failed_retries > 0` or `stalled > 0`
/// means something is stuck and needs an operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    /// Operations with `attempts >= max_attempts`.
    pub failed_retries: usize,
    /// Pending operations whose type has no registered handler.
    pub stalled: usize,
}

impl QueueStats {
    /// Nothing queued.
    pub fn is_idle(&self) -> bool {
        self.total == 0
    }

    /// Something needs an operator: exhausted or without a handler.
    pub fn has_stuck(&self) -> bool {
        self.failed_retries > 0 || self.stalled > 0
    }
}
