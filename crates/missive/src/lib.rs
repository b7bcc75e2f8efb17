//! # Missive
//!
//! In-process dispatch of commands, queries and events through configurable
//! middleware pipelines.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐     ┌─────────────────────────────── Pipeline ───────────────────────────────┐
//! │ MessageBus │────▶│ tracing → locator → validation → resolver → executor → recording        │──▶ handler
//! │            │◀────│           post-actions run in reverse once the chain completes          │
//! └────────────┘     └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Core**: messages, contexts, the pipeline, the query filter language
//! - **Framework**: the handler catalog plus the locator, resolver and executor middlewares
//! - **Runtime**: configuration, logging and the [`MessageBus`](runtime::MessageBus)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use missive::prelude::*;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Deposit { owner: String, amount: u64 }
//!
//! struct AccountHandlers { ledger: Arc<Ledger> }
//!
//! impl AccountHandlers {
//!     fn new(ledger: Arc<Ledger>) -> Self { Self { ledger } }
//!
//!     fn deposit(&self, cmd: Arc<Deposit>) -> Result<u64, LedgerError> {
//!         self.ledger.credit(&cmd.owner, cmd.amount)
//!     }
//! }
//!
//! fn register(catalog: &mut HandlerCatalog) {
//!     catalog
//!         .register::<AccountHandlers>()
//!         .marker(MessageKind::Command)
//!         .constructor(AccountHandlers::new)
//!         .handles::<Deposit, _, _>(AccountHandlers::deposit);
//! }
//!
//! #[distributed_slice(HANDLER_MODULES)]
//! #[linkme(crate = missive::framework::linkme)]
//! static ACCOUNTS: fn(&mut HandlerCatalog) = register;
//!
//! #[tokio::main]
//! async fn main() -> RuntimeResult<()> {
//!     let services = Arc::new(ServiceRegistry::new());
//!     services.singleton(Ledger::default());
//!
//!     let bus = MessageBus::from_config(&load_config()?, services)?;
//!     bus.send_async(Deposit { owner: "ada".into(), amount: 10 }).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use missive_core as core;
pub use missive_framework as framework;
pub use missive_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use missive::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    // Bus and configuration
    pub use missive_runtime::config::{ConfigLoader, MissiveConfig, PipelineConfig, load_config};
    pub use missive_runtime::{MessageBus, RuntimeError, RuntimeResult};

    // Messages and pipeline
    pub use missive_core::{
        CancellationToken, Message, MessageContext, MessageKind, MessageQuery, Middleware,
        Pipeline, PipelineError, ProcessingStatus, ServiceRegistry, async_trait,
    };

    // Handler registration
    pub use missive_framework::linkme::distributed_slice;
    pub use missive_framework::{
        Dep, HANDLER_MODULES, HandlerCatalog, Reply, ValidationMiddleware,
    };
}
