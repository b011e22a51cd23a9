//! Queue module: durable operation store, retry timing, and the loop that
//! drains it.

mod backoff;
mod dedupe;
mod processor;
mod scheduler;
mod store;

pub use backoff::{BackoffPolicy, Eligibility};
pub use dedupe::{Dedupe, payload_signature};
pub use processor::{LoopState, PassReport, Processor};
pub use scheduler::Scheduler;
pub use store::{Insert, OperationStore};
