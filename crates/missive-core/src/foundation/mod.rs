//! Foundation layer - data model and error taxonomy.
//!
//! This module contains the data carried through a pipeline:
//! - Message envelope, payload and status types
//! - The mutable per-dispatch context
//! - Persistence snapshots of dispatched messages

pub mod context;
pub mod error;
pub mod message;
pub mod record;

pub use context::{MessageContext, whole_millis};
pub use error::{
    BoxError, ConfigurationError, DispatchInfo, Failure, PipelineError, PipelineResult,
    ProcessingError, QueryParseError, QueryResult, RepositoryError, RepositoryResult,
    ResolveError, ResolveResult,
};
pub use message::{Message, MessageKind, Payload, ProcessingStatus, simple_type_name};
pub use record::MessageRecord;
