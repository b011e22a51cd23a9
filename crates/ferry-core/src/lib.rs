//! ferry-core
//!
//! Durable client-side operation queue. Mutations made while the remote is
//! unreachable are persisted and replayed through typed handlers, at least
//! once, when connectivity returns.
//!
//! # Modules
//! - **domain**: operation records, ids, stats, events, errors
//! - **ports**: abstractions for storage, connectivity, time, ids, events
//! - **impls**: in-memory and file-backed adapters
//! - **typed**: `Mutation` / `Handler` API and the handler registry
//! - **queue**: operation store, backoff, processing loop
//! - **app**: builder, config, and the `OfflineQueue` facade

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod typed;

pub use app::{EnqueueOptions, OfflineQueue, QueueBuilder, QueueConfig};
pub use domain::{FerryError, Operation, OperationId, QueueEvent, QueueStats};
pub use typed::{Handler, HandlerError, Mutation, handler_fn};
