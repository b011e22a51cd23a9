//! Mutation trait - binds an operation type string to a payload type.
//!
//! # Trait bounds
//! - `Serialize`: encoded into the operation payload at enqueue
//! - `DeserializeOwned`: decoded back at the handler boundary
//! - `Send + Sync + 'static`: handlers live in an `Arc` shared with the loop

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A typed client mutation.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct CreateTask {
///     title: String,
/// }
///
/// impl Mutation for CreateTask {
///     const TYPE: &'static str = "createTask";
/// }
/// ```
pub trait Mutation: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Operation type string; selects the handler and scopes dedupe keys.
    const TYPE: &'static str;
}
