//! Runtime error types.

use missive_core::PipelineError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The pipeline failed or rethrew a handler failure.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Validation rejected the message before it reached a handler.
    #[error("Message {content_type} rejected: {}", reasons.join("; "))]
    Rejected {
        content_type: String,
        reasons: Vec<String>,
    },

    /// A query completed without producing a result.
    #[error("Query {content_type} produced no result")]
    NoResult { content_type: String },

    /// A query produced a result of an unexpected type.
    #[error("Query {content_type} produced {found}, expected {expected}")]
    ResultType {
        content_type: String,
        expected: &'static str,
        found: &'static str,
    },

    /// The bus was shut down.
    #[error("Message bus is shut down")]
    ShutDown,

    /// Waiting for the shutdown signal failed.
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns the pipeline error, if this is one.
    pub fn as_pipeline(&self) -> Option<&PipelineError> {
        match self {
            Self::Pipeline(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
