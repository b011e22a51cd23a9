//! QueueBuilder - wires ports, handlers, and config into an `OfflineQueue`.
//!
//! Startup validation is fail-fast: `expect_types` declares which operation
//! types the application produces, and `build()` refuses to start if any of
//! them has no handler.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::info;

use super::config::{ConfigError, QueueConfig};
use super::offline_queue::OfflineQueue;
use crate::ports::{
    Clock, ConnectivityMonitor, DurableStore, EventSink, IdGenerator, NoopEventSink, StoreError, SystemClock,
    UlidGenerator,
};
use crate::queue::{OperationStore, Processor, Scheduler};
use crate::typed::{DynHandler, Handler, HandlerRegistry, Mutation};

/// Builds an `OfflineQueue`.
///
/// ```ignore
/// let queue = QueueBuilder::new(store, connectivity)
///     .register::<CreateTask, _>(CreateTaskHandler::new(api))
///     .expect_types(&[CreateTask::TYPE])
///     .build()
///     .await?;
/// ```
pub struct QueueBuilder {
    store: Arc<dyn DurableStore>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    events: Arc<dyn EventSink>,
    registry: HandlerRegistry,
    expected_types: Option<Vec<String>>,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("missing handlers for operation types: {0:?}")]
    MissingHandlers(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to restore queue: {0}")]
    Restore(#[from] StoreError),
}

impl QueueBuilder {
    /// Start a builder over the given store and connectivity monitor.
    ///
    /// Defaults: `QueueConfig::default()`, system clock, ULID ids, no-op event sink.
    pub fn new(store: Arc<dyn DurableStore>, connectivity: Arc<dyn ConnectivityMonitor>) -> Self {
        Self {
            store,
            connectivity,
            config: QueueConfig::default(),
            clock: Arc::new(SystemClock),
            ids: None,
            events: Arc::new(NoopEventSink),
            registry: HandlerRegistry::new(),
            expected_types: None,
        }
    }

    /// Replace the queue config.
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the clock. Tests pass a `FixedClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to ULIDs stamped with the builder's clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Where lifecycle events go.
    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Register a typed handler under `M::TYPE`.
    pub fn register<M: Mutation, H: Handler<M> + 'static>(self, handler: H) -> Self {
        self.registry.register::<M, H>(handler);
        self
    }

    /// Register an untyped handler for `op_type`.
    pub fn register_handler(self, op_type: impl Into<String>, handler: impl DynHandler + 'static) -> Self {
        self.registry.register_dyn(op_type, Arc::new(handler));
        self
    }

    /// Operation types that must have a handler when `build()` runs.
    pub fn expect_types(mut self, op_types: &[&str]) -> Self {
        self.expected_types = Some(op_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Restore the persisted queue and start the processing loop.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn build(self) -> Result<OfflineQueue, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingHandlers(missing));
            }
        }

        let store = Arc::new(OperationStore::load(self.store, self.config.storage_key.clone()).await?);
        info!(
            key = %self.config.storage_key,
            restored = store.len().await,
            handlers = self.registry.len(),
            "offline queue starting"
        );

        let registry = Arc::new(self.registry);
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&self.clock))));
        let processor = Arc::new(Processor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&self.connectivity),
            Arc::clone(&self.clock),
            Arc::clone(&self.events),
            self.config.backoff_policy(),
        ));
        let wake = Arc::new(Notify::new());
        let scheduler = Scheduler::spawn(
            Arc::clone(&processor),
            Arc::clone(&wake),
            self.connectivity.subscribe(),
            self.config.reschedule_interval(),
        );

        Ok(OfflineQueue::new(
            store,
            registry,
            processor,
            scheduler,
            wake,
            self.connectivity,
            self.clock,
            ids,
            self.events,
            self.config.default_max_attempts,
        ))
    }
}
