//! Ports - interfaces to the collaborators the queue depends on.
//!
//! Every external concern (storage, reachability, time, IDs, notifications)
//! is a trait here so the queue can be built against real backends in
//! production and deterministic fakes in tests.

pub mod clock;
pub mod connectivity;
pub mod durable_store;
pub mod event_sink;
pub mod id_generator;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::connectivity::ConnectivityMonitor;
pub use self::durable_store::{DurableStore, StoreError, load_json, save_json};
pub use self::event_sink::{EventSink, NoopEventSink};
pub use self::id_generator::{IdGenerator, UlidGenerator};
