//! DurableStore port - scoped persistent key-value storage.
//!
//! The queue keeps its whole operation list under one fixed key and rewrites
//! it after every mutation. Implementations must treat a missing key as
//! "nothing stored yet", not as an error.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Error type for durable store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend refused or could not complete the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Object-safe store interface. Values cross it as JSON; use
/// [`load_json`] / [`save_json`] for typed access.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;
}

/// Read and decode the value under `key`.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn DurableStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Encode and write `value` under `key`.
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn DurableStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(value)?;
    store.set(key, value).await
}
