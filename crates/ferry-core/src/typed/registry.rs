//! HandlerRegistry - operation type -> handler.
//!
//! Handlers are expected to be registered once at startup, but the queue
//! also accepts registrations while running (a feature module loaded late,
//! for example), so the map sits behind an `RwLock`. Lookups clone the `Arc`
//! and release the lock before the handler is awaited.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use super::handler::{DynHandler, Handler, TypedHandler};
use super::mutation::Mutation;

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn DynHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw handler for `op_type`. Last registration wins.
    ///
    /// Returns `true` if an earlier handler was replaced.
    pub fn register_dyn(&self, op_type: impl Into<String>, handler: Arc<dyn DynHandler>) -> bool {
        let op_type = op_type.into();
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = handlers.insert(op_type.clone(), handler).is_some();
        if replaced {
            warn!(op_type = %op_type, "handler replaced by a later registration");
        } else {
            debug!(op_type = %op_type, "handler registered");
        }
        replaced
    }

    /// Register a typed handler under `M::TYPE`.
    pub fn register<M: Mutation, H: Handler<M> + 'static>(&self, handler: H) -> bool {
        self.register_dyn(M::TYPE, Arc::new(TypedHandler::<M, H>::new(handler)))
    }

    /// Handler for `op_type`, if one is registered.
    pub fn get(&self, op_type: &str) -> Option<Arc<dyn DynHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(op_type)
            .cloned()
    }

    /// Whether `op_type` has a handler.
    pub fn contains(&self, op_type: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(op_type)
    }

    /// Registered types, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
