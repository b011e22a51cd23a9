//! OfflineQueue - the public face of the queue.
//!
//! Callers enqueue mutations and move on; the queue persists them and replays
//! them through the registered handlers whenever the remote is reachable.
//! Handler failures never come back through this API. They show up in
//! `stats()`, `pending()`, and the event sink.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::domain::{FerryError, Operation, OperationId, QueueEvent, QueueStats};
use crate::ports::{Clock, ConnectivityMonitor, EventSink, IdGenerator};
use crate::queue::{Dedupe, Insert, LoopState, OperationStore, PassReport, Processor, Scheduler};
use crate::typed::{DynHandler, Handler, HandlerRegistry, Mutation, PayloadCodec};

/// Per-enqueue options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Falls back to the configured default. Zero is treated as one.
    pub max_attempts: Option<u32>,
    pub dedupe: Option<Dedupe>,
}

impl EnqueueOptions {
    /// Defaults: configured `max_attempts`, no dedupe.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the attempt ceiling for this operation.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Deduplicate on a caller-supplied key, scoped to the operation type.
    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe = Some(Dedupe::key(key));
        self
    }

    /// Deduplicate on the payload's content.
    pub fn dedupe_payload(mut self) -> Self {
        self.dedupe = Some(Dedupe::Payload);
        self
    }
}

pub struct OfflineQueue {
    store: Arc<OperationStore>,
    registry: Arc<HandlerRegistry>,
    processor: Arc<Processor>,
    scheduler: Mutex<Option<Scheduler>>,
    wake: Arc<Notify>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
    default_max_attempts: u32,
    closed: AtomicBool,
}

impl OfflineQueue {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        store: Arc<OperationStore>,
        registry: Arc<HandlerRegistry>,
        processor: Arc<Processor>,
        scheduler: Scheduler,
        wake: Arc<Notify>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        events: Arc<dyn EventSink>,
        default_max_attempts: u32,
    ) -> Self {
        Self {
            store,
            registry,
            processor,
            scheduler: Mutex::new(Some(scheduler)),
            wake,
            connectivity,
            clock,
            ids,
            events,
            default_max_attempts,
            closed: AtomicBool::new(false),
        }
    }

    /// Persist a new operation and return its id.
    ///
    /// With a dedupe option, an equivalent pending operation of the same type
    /// wins: its id is returned and nothing is written. If the remote is
    /// reachable the processing loop is woken; the call does not wait for it.
    pub async fn enqueue(
        &self,
        op_type: impl Into<String>,
        payload: Value,
        options: EnqueueOptions,
    ) -> Result<OperationId, FerryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FerryError::Closed);
        }

        let max_attempts = options.max_attempts.unwrap_or(self.default_max_attempts).max(1);
        let mut op = Operation::new(
            self.ids.generate_operation_id(),
            op_type,
            payload,
            max_attempts,
            self.clock.now(),
        );
        if let Some(dedupe) = &options.dedupe {
            op.dedupe_key = Some(dedupe.resolve(&op.payload));
        }
        let op_type = op.op_type.clone();

        match self.store.insert(op).await? {
            Insert::Duplicate(id) => {
                debug!(op_id = %id, op_type = %op_type, "duplicate enqueue collapsed");
                Ok(id)
            }
            Insert::Created(id) => {
                info!(op_id = %id, op_type = %op_type, max_attempts, "operation enqueued");
                self.events.emit(QueueEvent::Enqueued { id, op_type });
                if self.connectivity.is_reachable() {
                    self.wake.notify_one();
                }
                Ok(id)
            }
        }
    }

    /// Enqueue a typed mutation under `M::TYPE`.
    pub async fn enqueue_mutation<M: Mutation>(
        &self,
        mutation: &M,
        options: EnqueueOptions,
    ) -> Result<OperationId, FerryError> {
        let payload = PayloadCodec::encode(mutation)?;
        self.enqueue(M::TYPE, payload, options).await
    }

    /// Drop an operation. Returns `false` if it was not queued.
    ///
    /// If its handler is running right now, that execution finishes but its
    /// outcome is discarded.
    pub async fn remove(&self, id: &OperationId) -> Result<bool, FerryError> {
        let removed = self.store.remove(id).await?;
        if removed {
            info!(op_id = %id, "operation removed");
        }
        Ok(removed)
    }

    /// Snapshot of every queued operation, exhausted ones included, in
    /// insertion order.
    pub async fn pending(&self) -> Vec<Operation> {
        self.store.snapshot().await
    }

    /// Queued operations of one type, in insertion order.
    pub async fn by_type(&self, op_type: &str) -> Vec<Operation> {
        self.store.by_type(op_type).await
    }

    /// Look up a single queued operation.
    pub async fn get(&self, id: &OperationId) -> Option<Operation> {
        self.store.get(id).await
    }

    /// Drop everything. Returns how many operations were removed.
    pub async fn clear(&self) -> Result<usize, FerryError> {
        let cleared = self.store.clear().await?;
        info!(cleared, "queue cleared");
        Ok(cleared)
    }

    /// Run one full pass now and wait for it. If a pass is already draining,
    /// this waits for it and then runs its own.
    pub async fn force_process(&self) -> PassReport {
        let report = self.processor.pass().await;
        if report.needs_retry() {
            self.processor.rearm.notify_one();
        }
        report
    }

    /// Counts by type plus exhausted and stalled operations.
    ///
    /// `stalled` is relative to the handlers registered on this queue.
    pub async fn stats(&self) -> QueueStats {
        let registry = &self.registry;
        self.store.stats(|op_type| registry.contains(op_type)).await
    }

    /// Register (or replace) the handler for `op_type`.
    pub fn register_handler(&self, op_type: impl Into<String>, handler: impl DynHandler + 'static) -> bool {
        self.registry.register_dyn(op_type, Arc::new(handler))
    }

    /// Register (or replace) a typed handler under `M::TYPE`.
    pub fn register<M: Mutation, H: Handler<M> + 'static>(&self, handler: H) -> bool {
        self.registry.register::<M, H>(handler)
    }

    /// Whether `op_type` currently has a handler.
    pub fn has_handler(&self, op_type: &str) -> bool {
        self.registry.contains(op_type)
    }

    /// State of the processing loop after its most recent pass.
    pub fn loop_state(&self) -> LoopState {
        self.processor.state()
    }

    /// Current reachability as reported by the connectivity monitor.
    pub fn is_reachable(&self) -> bool {
        self.connectivity.is_reachable()
    }

    /// Stop the processing loop and drop the connectivity subscription.
    ///
    /// Waits for an in-flight pass to finish. Queued operations stay
    /// persisted. Further `enqueue` calls fail with `FerryError::Closed`;
    /// inspection and `force_process` keep working. Safe to call twice.
    pub async fn cleanup(&self) {
        self.closed.store(true, Ordering::Release);
        let scheduler = self.scheduler.lock().await.take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown_and_join().await;
            info!("offline queue stopped");
        }
    }
}

impl Drop for OfflineQueue {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler.get_mut().as_ref() {
            scheduler.request_shutdown();
        }
    }
}
