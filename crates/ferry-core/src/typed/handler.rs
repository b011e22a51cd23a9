//! Handler traits - executors that perform the remote side effect.
//!
//! Two layers:
//! - `Handler<M>`: typed, what applications implement
//! - `DynHandler`: object-safe, what the registry stores
//!
//! `TypedHandler<M, H>` erases the type by decoding the stored JSON payload
//! into `M` before calling the typed handler.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::codec::{CodecError, PayloadCodec};
use super::mutation::Mutation;
use crate::domain::ErrorKind;

/// Failure reported by a handler.
///
/// Transient failures are retried with backoff until `max_attempts`.
/// Permanent failures park the operation immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
}

impl HandlerError {
    /// Retryable failure: the operation backs off and is tried again.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    /// Non-retryable failure: the operation is exhausted right away.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Transient or permanent.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Message without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Transient => write!(f, "{}", self.message),
            ErrorKind::Permanent => write!(f, "permanent: {}", self.message),
        }
    }
}

impl std::error::Error for HandlerError {}

/// A payload that does not decode today will not decode tomorrow either.
impl From<CodecError> for HandlerError {
    fn from(err: CodecError) -> Self {
        Self::permanent(err.to_string())
    }
}

/// Executes one kind of mutation against the remote authority.
///
/// Delivery is at-least-once: a crash between a successful call and the
/// persisted removal redelivers the same mutation, so implementations must
/// be idempotent.
///
/// ```ignore
/// struct CreateTaskHandler { api: ApiClient }
///
/// #[async_trait]
/// impl Handler<CreateTask> for CreateTaskHandler {
///     async fn handle(&self, task: CreateTask) -> Result<(), HandlerError> {
///         self.api.create_task(&task.title).await.map_err(|e| HandlerError::transient(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<M: Mutation>: Send + Sync {
    async fn handle(&self, mutation: M) -> Result<(), HandlerError>;
}

/// Object-safe handler over the raw payload.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: serde_json::Value) -> Result<(), HandlerError>;
}

pub struct TypedHandler<M: Mutation, H: Handler<M>> {
    handler: H,
    _marker: PhantomData<fn() -> M>,
}

impl<M: Mutation, H: Handler<M>> TypedHandler<M, H> {
    /// Wrap a typed handler so it can be stored in the registry.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M: Mutation, H: Handler<M>> DynHandler for TypedHandler<M, H> {
    async fn handle_dyn(&self, payload: serde_json::Value) -> Result<(), HandlerError> {
        let mutation: M = PayloadCodec::decode(payload)?;
        self.handler.handle(mutation).await
    }
}

/// Handler built from an async closure over the raw payload.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a `DynHandler`.
///
/// ```ignore
/// queue.register_handler("ping", handler_fn(|_payload| async { Ok(()) }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> DynHandler for FnHandler<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle_dyn(&self, payload: serde_json::Value) -> Result<(), HandlerError> {
        (self.f)(payload).await
    }
}
