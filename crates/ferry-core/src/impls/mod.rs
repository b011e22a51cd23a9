//! Impls - concrete adapters for the ports.
//!
//! - `InMemoryStore`, `ManualConnectivity`: development and tests
//! - `JsonFileStore`: file-backed durable store for single-process clients
//! - `BroadcastEventSink`, `TracingEventSink`: event observers

pub mod event_sinks;
pub mod file_store;
pub mod manual_connectivity;
pub mod memory_store;

pub use self::event_sinks::{BroadcastEventSink, TracingEventSink};
pub use self::file_store::JsonFileStore;
pub use self::manual_connectivity::ManualConnectivity;
pub use self::memory_store::InMemoryStore;
