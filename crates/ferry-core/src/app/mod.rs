//! App - application layer.
//!
//! Wires the ports together into a running queue.
//!
//! # Components
//! - **QueueBuilder**: wiring and fail-fast startup validation
//! - **QueueConfig**: tunables, loadable from TOML
//! - **OfflineQueue**: the caller-facing API

pub mod builder;
pub mod config;
pub mod offline_queue;

pub use self::builder::{BuildError, QueueBuilder};
pub use self::config::{BackoffConfig, ConfigError, QueueConfig};
pub use self::offline_queue::{EnqueueOptions, OfflineQueue};
