//! Missive Runtime - configuration, logging and the message bus.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `MissiveConfig`)
//! - Logging setup on `tracing-subscriber` (`LoggingBuilder`)
//! - `MessageBus`, which assembles the command, query and event pipelines
//!
//! ```ignore
//! use std::sync::Arc;
//! use missive_core::ServiceRegistry;
//! use missive_runtime::{MessageBus, config::load_config};
//!
//! #[tokio::main]
//! async fn main() -> missive_runtime::RuntimeResult<()> {
//!     let services = Arc::new(ServiceRegistry::new());
//!     let bus = MessageBus::from_config(&load_config()?, services)?;
//!
//!     bus.send_async(OpenAccount { owner: "ada".into() }).await?;
//!     let balance: u64 = bus.query_async(Balance { owner: "ada".into() }).await?;
//!
//!     bus.run_until_ctrl_c().await
//! }
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod logging;

// Re-exports
pub use bus::{MessageBus, MessageBusBuilder};
pub use config::{
    ConfigError, ConfigLoader, ConfigResult, LoggingConfig, MissiveConfig, PipelineConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the commonly used logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
