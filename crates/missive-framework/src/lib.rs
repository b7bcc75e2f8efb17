//! # Missive Framework
//!
//! Handler dispatch on top of the Missive core pipeline.
//!
//! This layer provides:
//! - [`HandlerCatalog`]: the registration table of handler types, their
//!   constructors and methods (populated manually or at link time)
//! - Axum-style injection: constructors and methods are plain functions whose
//!   parameters implement [`Inject`]
//! - The dispatch middlewares: [`HandlerLocator`] → [`HandlerResolver`] →
//!   [`HandlerExecutor`], with their construction and call caches
//! - Cross-cutting middlewares for tracing, validation and recording
//!
//! ## Example
//!
//! ```rust,ignore
//! use missive_core::{Message, MessageContext, MessageKind, Pipeline};
//! use missive_framework::{HandlerCatalog, HandlerExecutor, HandlerLocator, HandlerResolver};
//! use std::sync::Arc;
//!
//! let mut catalog = HandlerCatalog::new();
//! catalog
//!     .register::<AccountHandlers>()
//!     .marker(MessageKind::Command)
//!     .constructor(AccountHandlers::new)
//!     .handles::<OpenAccount, _, _>(AccountHandlers::open);
//! let catalog = Arc::new(catalog);
//!
//! let pipeline = Pipeline::with_middlewares(vec![
//!     Arc::new(HandlerLocator::new(catalog.clone())),
//!     Arc::new(HandlerResolver::new(catalog.clone())),
//!     Arc::new(HandlerExecutor::new(catalog)),
//! ])?;
//!
//! let mut ctx = MessageContext::with_resolver(Message::command(open), services);
//! pipeline.invoke(&mut ctx)?;
//! ```

pub mod catalog;
pub mod construct;
pub mod executor;
pub mod inject;
pub mod locator;
pub mod method;
pub mod middleware;
pub mod resolver;

pub use catalog::{
    ConstructorDescriptor, HANDLER_MODULES, HandlerCatalog, HandlerDescriptor, HandlerInstance,
    HandlerRegistration, MethodDescriptor, PropertyDescriptor,
};
pub use construct::Constructor;
pub use executor::{CallCache, CallStrategy, HandlerExecutor, MethodKey};
pub use inject::{Arguments, Binding, Dep, Inject, ParamInfo, constructor_bindings, method_bindings};
pub use locator::{DEFAULT_SUFFIX, HandlerLocator, LocatedHandler, LocatorStrategy};
pub use method::{AsyncMethod, HandlerOutput, Invocation, MethodOutput, Outcome, Reply, SyncMethod};
pub use middleware::{
    RecordingMiddleware, TracingMiddleware, ValidationFailure, ValidationMiddleware,
};
pub use resolver::{
    ConstructionCache, ConstructorResolver, HandlerFactory, MAX_DEPTH, ResolvedHandler,
    HandlerResolver,
};

// Re-exported so `#[distributed_slice(HANDLER_MODULES)]` works without a
// direct linkme dependency.
pub use linkme;
