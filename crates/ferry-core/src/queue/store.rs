//! OperationStore: the in-memory operation list and its durable mirror.
//!
//! Every mutation happens under one async mutex that is held across the
//! durable write, so a concurrent enqueue and a draining pass can never
//! interleave their snapshots and lose an update.
//!
//! Two persistence-failure policies:
//! - caller-initiated mutations (`insert`, `remove`, `clear`) roll the
//!   in-memory change back and return the error
//! - loop-initiated mutations (`complete`, `record_failure`) keep the change,
//!   mark the store dirty and log; the next pass or any later write retries
//!   the full snapshot

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::domain::{Operation, OperationId, QueueStats};
use crate::ports::{DurableStore, StoreError, load_json, save_json};
use crate::typed::HandlerError;

/// Result of inserting an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    Created(OperationId),
    /// A pending operation with the same type and dedupe key already exists.
    Duplicate(OperationId),
}

impl Insert {
    /// Id of the stored operation, new or existing.
    pub fn id(self) -> OperationId {
        match self {
            Insert::Created(id) | Insert::Duplicate(id) => id,
        }
    }
}

struct StoreState {
    operations: Vec<Operation>,
    /// In-memory state is ahead of the durable snapshot.
    dirty: bool,
}

pub struct OperationStore {
    durable: Arc<dyn DurableStore>,
    key: String,
    state: Mutex<StoreState>,
}

impl OperationStore {
    /// Load the persisted list under `key`. A missing key is an empty queue.
    pub async fn load(durable: Arc<dyn DurableStore>, key: impl Into<String>) -> Result<Self, StoreError> {
        let key = key.into();
        let operations: Vec<Operation> = load_json(durable.as_ref(), &key).await?.unwrap_or_default();
        info!(key = %key, count = operations.len(), "operation store loaded");
        Ok(Self {
            durable,
            key,
            state: Mutex::new(StoreState {
                operations,
                dirty: false,
            }),
        })
    }

    /// Durable store key holding the snapshot.
    pub fn key(&self) -> &str {
        &self.key
    }

    async fn persist(&self, state: &mut StoreState) -> Result<(), StoreError> {
        match save_json(self.durable.as_ref(), &self.key, &state.operations).await {
            Ok(()) => {
                state.dirty = false;
                Ok(())
            }
            Err(e) => {
                state.dirty = true;
                Err(e)
            }
        }
    }

    /// Persist a loop-initiated change; failures only mark the store dirty.
    async fn persist_or_mark_dirty(&self, state: &mut StoreState, what: &str) {
        if let Err(e) = self.persist(state).await {
            error!(key = %self.key, error = %e, "persisting {what} failed; will retry on next write");
        }
    }

    /// Append `op` unless a pending operation already holds its dedupe key.
    pub async fn insert(&self, op: Operation) -> Result<Insert, StoreError> {
        let mut state = self.state.lock().await;

        if let Some(key) = op.dedupe_key.as_deref()
            && let Some(existing) = state
                .operations
                .iter()
                .find(|existing| existing.matches_dedupe(&op.op_type, key))
        {
            debug!(op_id = %existing.id, op_type = %op.op_type, "duplicate enqueue collapsed");
            return Ok(Insert::Duplicate(existing.id));
        }

        let id = op.id;
        let was_dirty = state.dirty;
        state.operations.push(op);
        if let Err(e) = self.persist(&mut state).await {
            state.operations.pop();
            state.dirty = was_dirty;
            return Err(e);
        }
        Ok(Insert::Created(id))
    }

    /// Remove by id. Returns whether anything was removed.
    pub async fn remove(&self, id: &OperationId) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let Some(index) = state.operations.iter().position(|op| op.id == *id) else {
            return Ok(false);
        };

        let was_dirty = state.dirty;
        let removed = state.operations.remove(index);
        if let Err(e) = self.persist(&mut state).await {
            state.operations.insert(index, removed);
            state.dirty = was_dirty;
            return Err(e);
        }
        Ok(true)
    }

    /// Drop everything. Returns how many operations were removed.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let was_dirty = state.dirty;
        let previous = std::mem::take(&mut state.operations);
        if let Err(e) = self.persist(&mut state).await {
            state.operations = previous;
            state.dirty = was_dirty;
            return Err(e);
        }
        Ok(previous.len())
    }

    /// Remove a delivered operation. `None` if it was cancelled meanwhile.
    pub async fn complete(&self, id: &OperationId) -> Option<Operation> {
        let mut state = self.state.lock().await;
        let index = state.operations.iter().position(|op| op.id == *id)?;
        let removed = state.operations.remove(index);
        self.persist_or_mark_dirty(&mut state, "delivery").await;
        Some(removed)
    }

    /// Record a failed attempt. Returns the updated operation, or `None` if
    /// it was cancelled while the handler ran.
    pub async fn record_failure(
        &self,
        id: &OperationId,
        at: DateTime<Utc>,
        err: &HandlerError,
    ) -> Option<Operation> {
        let mut state = self.state.lock().await;
        let op = state.operations.iter_mut().find(|op| op.id == *id)?;
        if err.is_permanent() {
            op.record_permanent_failure(at, err.to_string());
        } else {
            op.record_failure(at, err.to_string());
        }
        let updated = op.clone();
        self.persist_or_mark_dirty(&mut state, "failed attempt").await;
        Some(updated)
    }

    /// Retry a snapshot write that failed earlier. Returns whether a write happened.
    pub async fn flush_if_dirty(&self) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(false);
        }
        self.persist(&mut state).await?;
        info!(key = %self.key, "pending snapshot flushed");
        Ok(true)
    }

    /// Whether a loop write failed and the snapshot is behind.
    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    /// Copy of the whole list in insertion order.
    pub async fn snapshot(&self) -> Vec<Operation> {
        self.state.lock().await.operations.clone()
    }

    /// Copies of the operations with the given type, in order.
    pub async fn by_type(&self, op_type: &str) -> Vec<Operation> {
        self.state
            .lock()
            .await
            .operations
            .iter()
            .filter(|op| op.op_type == op_type)
            .cloned()
            .collect()
    }

    /// Copy of one operation.
    pub async fn get(&self, id: &OperationId) -> Option<Operation> {
        self.state
            .lock()
            .await
            .operations
            .iter()
            .find(|op| op.id == *id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.operations.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Operations that can still be attempted (not exhausted).
    pub async fn deliverable_count(&self) -> usize {
        self.state
            .lock()
            .await
            .operations
            .iter()
            .filter(|op| !op.is_exhausted())
            .count()
    }

    /// Aggregate counts. `has_handler` decides what counts as stalled.
    pub async fn stats(&self, has_handler: impl Fn(&str) -> bool) -> QueueStats {
        let state = self.state.lock().await;
        let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut failed_retries = 0;
        let mut stalled = 0;

        for op in &state.operations {
            *by_type.entry(op.op_type.clone()).or_default() += 1;
            if op.is_exhausted() {
                failed_retries += 1;
            } else if !has_handler(&op.op_type) {
                stalled += 1;
            }
        }

        QueueStats {
            total: state.operations.len(),
            by_type,
            failed_retries,
            stalled,
        }
    }
}
