//! Unified error types for the Missive core.
//!
//! The taxonomy mirrors how a dispatch can go wrong:
//!
//! - [`ConfigurationError`]: the system was wired incorrectly (no handler for a
//!   content type, unknown middleware id, ...). Always surfaced immediately.
//! - [`ResolveError`]: a dependency could not be produced by the resolver.
//! - [`Failure`]: a handler returned an error. Captured into the context,
//!   not raised until the executor's post-action decides to.
//! - [`ProcessingError`]: the wrapper raised for a captured [`Failure`].
//! - [`PipelineError`]: umbrella type returned by middlewares and pipelines.
//! - [`QueryParseError`]: malformed textual message query.
//! - [`RepositoryError`]: a message repository could not store or read records.

use std::any::type_name;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Boxed error used for infrastructure failures of custom middlewares.
pub type BoxError = Box<dyn StdError + Send + Sync>;

// =============================================================================
// Captured handler failures
// =============================================================================

/// A handler failure captured during execution.
///
/// Cheap to clone: the original error is shared, so the context, the
/// [`ProcessingError`] raised later and any [`Message`](super::message::Message)
/// derived from the context all point at the same error value.
#[derive(Clone)]
pub struct Failure {
    error: Arc<dyn StdError + Send + Sync + 'static>,
    type_name: &'static str,
}

impl Failure {
    /// Captures `error`, remembering its concrete type name.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            error: Arc::new(error),
            type_name: type_name::<E>(),
        }
    }

    /// Returns the concrete type name of the captured error.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the error's display text.
    pub fn message(&self) -> String {
        self.error.to_string()
    }

    /// Returns the original error.
    pub fn error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.error
    }

    /// Attempts to view the original error as `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    /// Returns `true` if both values capture the very same error.
    pub fn ptr_eq(&self, other: &Failure) -> bool {
        Arc::ptr_eq(&self.error, &other.error)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("type_name", &self.type_name)
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl StdError for Failure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.source()
    }
}

/// Where a captured [`Failure`] was raised.
///
/// Stored in the context item bag by the executor and carried by the
/// [`ProcessingError`] so the original throw site survives the rethrow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchInfo {
    /// Type name of the handler whose method failed.
    pub handler: &'static str,
    /// Content type of the message being handled.
    pub content_type: String,
    /// Whether the failing method was asynchronous.
    pub asynchronous: bool,
    /// When the failure was captured.
    pub captured_at: DateTime<Utc>,
}

// =============================================================================
// Configuration errors
// =============================================================================

/// Errors caused by incorrect wiring of the dispatch system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// No handler type is registered for the content type.
    #[error("no handler found for content type '{content_type}'")]
    HandlerNotFound {
        /// The content type that could not be routed.
        content_type: String,
    },

    /// The handler type was located but could not be constructed.
    #[error("handler '{handler}' could not be constructed: no constructor registered")]
    HandlerNotConstructed {
        /// The handler type name.
        handler: &'static str,
    },

    /// The executor ran without a located and resolved handler in the context.
    #[error("no resolved handler in context for content type '{content_type}'")]
    HandlerNotResolved {
        /// The content type being dispatched.
        content_type: String,
    },

    /// The handler has no method accepting the content type.
    #[error("handler '{handler}' has no method for content type '{content_type}'")]
    MethodNotFound {
        /// The handler type name.
        handler: &'static str,
        /// The content type being dispatched.
        content_type: String,
    },

    /// A parameter bound to the payload cannot hold it.
    #[error("payload of type '{actual}' cannot be bound to parameter of type '{expected}'")]
    PayloadMismatch {
        /// Declared parameter type.
        expected: &'static str,
        /// Actual payload type.
        actual: &'static str,
    },

    /// A parameter cannot receive the value its binding produces.
    #[error("parameter of type '{parameter}' cannot be bound")]
    UnboundParameter {
        /// Declared parameter type.
        parameter: &'static str,
    },

    /// No middleware with the requested id.
    #[error("middleware '{id}' not found")]
    MiddlewareNotFound {
        /// The requested id.
        id: String,
    },

    /// Two middlewares share an id.
    #[error("middleware id '{id}' is registered more than once")]
    DuplicateMiddleware {
        /// The duplicated id.
        id: String,
    },
}

// =============================================================================
// Dependency resolution errors
// =============================================================================

/// Errors produced while resolving dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A required dependency has no registration.
    #[error("no registration for required dependency '{type_name}'")]
    Missing {
        /// The requested type.
        type_name: &'static str,
    },

    /// The registered instance is not of the requested type.
    #[error("registered instance for '{type_name}' has a different type")]
    TypeMismatch {
        /// The requested type.
        type_name: &'static str,
    },

    /// Recursive construction went deeper than allowed.
    #[error("constructing '{type_name}' exceeded the maximum depth of {depth}")]
    DepthExceeded {
        /// The type being constructed when the limit was hit.
        type_name: &'static str,
        /// The depth limit.
        depth: usize,
    },

    /// A registered factory failed.
    #[error("failed to construct '{type_name}': {reason}")]
    Construction {
        /// The type being constructed.
        type_name: &'static str,
        /// Factory error text.
        reason: String,
    },
}

impl ResolveError {
    /// Creates a missing-dependency error for `T`.
    pub fn missing<T: ?Sized>() -> Self {
        Self::Missing {
            type_name: type_name::<T>(),
        }
    }

    /// Creates a construction error for `T`.
    pub fn construction<T: ?Sized>(reason: impl Into<String>) -> Self {
        Self::Construction {
            type_name: type_name::<T>(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Processing error
// =============================================================================

/// Raised by the executor's post-action when a handler failed and the
/// throw-on-fail policy is enabled.
///
/// [`source`](StdError::source) yields the original handler error.
#[derive(Debug, Clone)]
pub struct ProcessingError {
    message_id: Uuid,
    content_type: String,
    failure: Failure,
    dispatch: Option<DispatchInfo>,
}

impl ProcessingError {
    /// Wraps a captured failure.
    pub fn new(
        message_id: Uuid,
        content_type: impl Into<String>,
        failure: Failure,
        dispatch: Option<DispatchInfo>,
    ) -> Self {
        Self {
            message_id,
            content_type: content_type.into(),
            failure,
            dispatch,
        }
    }

    /// Id of the failed message.
    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    /// Content type of the failed message.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// The captured failure.
    pub fn failure(&self) -> &Failure {
        &self.failure
    }

    /// Where the failure was raised, if the executor recorded it.
    pub fn dispatch_info(&self) -> Option<&DispatchInfo> {
        self.dispatch.as_ref()
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processing of message {} ({}) failed: {}",
            self.message_id, self.content_type, self.failure
        )
    }
}

impl StdError for ProcessingError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.failure.error())
    }
}

// =============================================================================
// Pipeline errors
// =============================================================================

/// Errors returned by middlewares and pipelines.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The system is misconfigured.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A dependency could not be resolved.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A captured handler failure was rethrown.
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// The dispatch was cancelled between two middlewares.
    #[error("dispatch cancelled")]
    Cancelled,

    /// A middleware itself failed.
    #[error("middleware '{id}' failed: {source}")]
    Middleware {
        /// Id of the failing middleware.
        id: String,
        /// The underlying error.
        #[source]
        source: BoxError,
    },
}

impl PipelineError {
    /// Creates an infrastructure error for the middleware `id`.
    pub fn middleware(id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Middleware {
            id: id.into(),
            source: source.into(),
        }
    }

    /// Returns `true` for configuration errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns the wrapped processing error, if any.
    pub fn as_processing(&self) -> Option<&ProcessingError> {
        match self {
            Self::Processing(e) => Some(e),
            _ => None,
        }
    }
}

// =============================================================================
// Query errors
// =============================================================================

/// Errors produced while parsing a textual message query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryParseError {
    /// The field name is not part of the query language.
    #[error("unknown query field '{0}'")]
    UnknownField(String),

    /// The field does not accept the operator.
    #[error("operator '{operator}' is not supported for field '{field}'")]
    UnsupportedOperator {
        /// The field name.
        field: String,
        /// The operator token.
        operator: String,
    },

    /// The value cannot be converted to the field's type.
    #[error("invalid value '{value}' for field '{field}': {reason}")]
    InvalidValue {
        /// The field name.
        field: String,
        /// The value token.
        value: String,
        /// Why conversion failed.
        reason: String,
    },

    /// The expression ended before the field's value.
    #[error("field '{0}' has no value")]
    MissingValue(String),

    /// A token appeared where a field name was expected.
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
}

// =============================================================================
// Repository errors
// =============================================================================

/// Errors reported by message repositories.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The repository cannot currently accept or serve records.
    #[error("repository unavailable: {0}")]
    Unavailable(String),

    /// The storage backend failed.
    #[error(transparent)]
    Backend(BoxError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for pipeline and middleware operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Result type for dependency resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Result type for query parsing.
pub type QueryResult<T> = Result<T, QueryParseError>;

/// Result type for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;
