//! Domain model (IDs, operation records, stats, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod operation;
pub mod stats;

pub use self::errors::{ErrorKind, FerryError};
pub use self::events::QueueEvent;
pub use self::ids::{OperationId, ParseIdError};
pub use self::operation::Operation;
pub use self::stats::QueueStats;
