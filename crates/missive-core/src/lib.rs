//! # Missive Core
//!
//! The core engine of the Missive message-dispatch framework.
//!
//! This crate provides the building blocks every other Missive crate is built
//! on: the message data model, the dependency-resolution and repository
//! boundaries, the middleware [`Pipeline`] and the [`MessageQuery`] filter
//! language.
//!
//! ## Layers
//!
//! ### Foundation
//!
//! - **Messages**: [`Message`], [`Payload`], [`MessageKind`], [`ProcessingStatus`]
//! - **Dispatch state**: [`MessageContext`] with its typed item bag
//! - **Persistence snapshots**: [`MessageRecord`]
//! - **Errors**: [`PipelineError`] and the taxonomy below it
//!
//! ### Boundaries
//!
//! - **Dependencies**: [`DependencyResolver`], [`ServiceRegistry`]
//! - **Storage**: [`MessageRepository`], [`InMemoryRepository`]
//!
//! ### Execution
//!
//! - **Pipeline**: [`Pipeline`] and the [`Middleware`] contract
//! - **Query**: [`MessageQuery`] and its text form
//!
//! ## Flow
//!
//! ```text
//! ┌─────────┐    ┌──────────────────────────────────────┐    ┌────────────┐
//! │ Message │───▶│ Pipeline: m1 ─▶ m2 ─▶ ... ─▶ post(*) │───▶│ Repository │
//! └─────────┘    └──────────────────────────────────────┘    └────────────┘
//!                      MessageContext (status, items)          MessageRecord
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use missive_core::{Message, MessageContext, Pipeline, from_fn};
//! use std::sync::Arc;
//!
//! let pipeline = Pipeline::with_middlewares(vec![Arc::new(from_fn("audit", |ctx| {
//!     tracing::info!(id = %ctx.id(), "seen");
//!     Ok(())
//! }))])?;
//!
//! let mut ctx = MessageContext::new(Message::command(OpenAccount { owner: "ada".into() }));
//! pipeline.invoke(&mut ctx)?;
//! ```

pub mod foundation;
pub mod pipeline;
pub mod query;
pub mod repository;
pub mod resolver;

pub use foundation::{
    BoxError, ConfigurationError, DispatchInfo, Failure, Message, MessageContext, MessageKind,
    MessageRecord, Payload, PipelineError, PipelineResult, ProcessingError, ProcessingStatus,
    QueryParseError, QueryResult, RepositoryError, RepositoryResult, ResolveError, ResolveResult,
    simple_type_name, whole_millis,
};
pub use pipeline::{BoxedMiddleware, FnMiddleware, Middleware, Pipeline, from_fn};
pub use query::MessageQuery;
pub use repository::{InMemoryRepository, MessageRepository};
pub use resolver::{
    DependencyResolver, Instance, NullResolver, ResolverExt, ServiceKey, ServiceRegistry, instance,
};

// Re-exported for middleware implementors.
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

/// Prelude for common imports.
pub mod prelude {
    pub use super::foundation::*;
    pub use super::pipeline::{BoxedMiddleware, Middleware, Pipeline, from_fn};
    pub use super::query::MessageQuery;
    pub use super::repository::{InMemoryRepository, MessageRepository};
    pub use super::resolver::{DependencyResolver, ResolverExt, ServiceRegistry};
    pub use super::{CancellationToken, async_trait};
}
