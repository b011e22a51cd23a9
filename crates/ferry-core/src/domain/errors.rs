//! Errors - error types and their classification.

use thiserror::Error;

use crate::ports::durable_store::StoreError;
use crate::typed::codec::CodecError;

/// Classification of a handler failure.
///
/// - Transient: retry with backoff (network blips, 5xx, timeouts)
/// - Permanent: retrying cannot help (malformed payload, 4xx rejections)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
}

/// Errors surfaced to callers of the queue API.
///
/// Handler failures never show up here: they are contained in the
/// processing loop and observable only through stats and events.
#[derive(Debug, Error)]
pub enum FerryError {
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("payload codec failed: {0}")]
    Codec(#[from] CodecError),

    #[error("queue is closed")]
    Closed,
}

impl FerryError {
    /// Whether the durable store rejected the write.
    pub fn is_persistence(&self) -> bool {
        matches!(self, FerryError::Persistence(_))
    }
}
