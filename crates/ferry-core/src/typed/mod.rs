//! Typed - typed mutation API.
//!
//! Binds operation type strings to payload types so typos in `op_type`
//! become compile errors and handlers receive decoded structs.
//!
//! # Two layers
//! - **Typed**: `Mutation`, `Handler<M>`
//! - **Dyn**: `DynHandler`, object-safe, stored in the registry

pub mod codec;
pub mod handler;
pub mod mutation;
pub mod registry;

pub use self::codec::{CodecError, PayloadCodec};
pub use self::handler::{DynHandler, FnHandler, Handler, HandlerError, TypedHandler, handler_fn};
pub use self::mutation::Mutation;
pub use self::registry::HandlerRegistry;
