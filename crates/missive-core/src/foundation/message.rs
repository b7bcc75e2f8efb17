//! Message envelope and its building blocks.
//!
//! A [`Message`] wraps a content value ([`Payload`]) with identity and
//! bookkeeping metadata. Callers build one, hand it to a pipeline through a
//! [`MessageContext`](super::context::MessageContext), and may turn the
//! finished context back into a `Message` or a
//! [`MessageRecord`](super::record::MessageRecord).

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::error::Failure;

// ============================================================================
// Message Kind
// ============================================================================

/// Classification of a message, stored as a small integer type tag.
///
/// Serializes as its [`code`](Self::code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageKind {
    /// A request to change state.
    Command,
    /// A request to read state.
    Query,
    /// A notification that something happened.
    Event,
}

impl MessageKind {
    /// All kinds, in type-code order.
    pub const ALL: [MessageKind; 3] = [Self::Command, Self::Query, Self::Event];

    /// Returns the integer type code.
    pub fn code(self) -> u8 {
        match self {
            Self::Command => 1,
            Self::Query => 2,
            Self::Event => 3,
        }
    }

    /// Looks up a kind by its integer type code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Command),
            2 => Some(Self::Query),
            3 => Some(Self::Event),
            _ => None,
        }
    }

    /// Returns the lowercase kind name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Query => "query",
            Self::Event => "event",
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind.code()
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown message kind code {code}"))
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ();

    /// Accepts a kind name (any case) or its integer type code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.trim().parse::<u8>() {
            return Self::from_code(code).ok_or(());
        }
        match s.trim().to_lowercase().as_str() {
            "command" => Ok(Self::Command),
            "query" => Ok(Self::Query),
            "event" => Ok(Self::Event),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Processing Status
// ============================================================================

/// Processing state of a message.
///
/// ```text
/// NotInitialized ──► Processing ──► Completed
///                              ├──► Failed
///                              └──► Rejected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProcessingStatus {
    /// Created but not yet handed to a pipeline.
    #[default]
    NotInitialized,
    /// The pipeline is running the middleware chain.
    Processing,
    /// The handler finished without error.
    Completed,
    /// The handler returned an error.
    Failed,
    /// The message was refused before execution (e.g. validation).
    Rejected,
}

impl ProcessingStatus {
    /// Returns the variant name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotInitialized => "NotInitialized",
            Self::Processing => "Processing",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Rejected => "Rejected",
        }
    }

    /// Returns `true` for `Completed`, `Failed` and `Rejected`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "notinitialized" => Ok(Self::NotInitialized),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Payload
// ============================================================================

type SnapshotFn = fn(&(dyn Any + Send + Sync)) -> Option<Value>;

fn snapshot_json<T: Serialize + 'static>(value: &(dyn Any + Send + Sync)) -> Option<Value> {
    value
        .downcast_ref::<T>()
        .and_then(|v| serde_json::to_value(v).ok())
}

/// Type-erased message content.
///
/// The concrete type is captured once at construction: its [`TypeId`] routes
/// the message and its [`type_name`] becomes the content type identifier.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
    snapshot: Option<SnapshotFn>,
}

impl Payload {
    /// Wraps a serializable content value.
    pub fn new<T>(value: T) -> Self
    where
        T: Serialize + Send + Sync + 'static,
    {
        Self {
            value: Arc::new(value),
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            snapshot: Some(snapshot_json::<T>),
        }
    }

    /// Wraps a content value that has no JSON representation.
    pub fn opaque<T: Send + Sync + 'static>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wraps an already shared content value.
    pub fn from_arc<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Self {
            value,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            snapshot: None,
        }
    }

    /// Returns the [`TypeId`] of the content.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the full type name of the content.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the content type name without module path or generics.
    pub fn simple_name(&self) -> &'static str {
        simple_type_name(self.type_name)
    }

    /// Returns `true` if the content is a `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrows the content as `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Returns a shared handle to the content as `T`.
    pub fn downcast_arc<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    /// Returns the untyped shared content.
    pub fn as_any_arc(&self) -> Arc<dyn Any + Send + Sync> {
        Arc::clone(&self.value)
    }

    /// Serializes the content, if it was created from a serializable value.
    pub fn to_json(&self) -> Option<Value> {
        self.snapshot.and_then(|f| f(&*self.value))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("type_name", &self.type_name)
            .field("serializable", &self.snapshot.is_some())
            .finish_non_exhaustive()
    }
}

/// Strips the module path and generic arguments from a type name.
///
/// `my_app::orders::CreateOrder` becomes `CreateOrder`, and
/// `my_app::Wrapper<my_app::Inner>` becomes `Wrapper`.
pub fn simple_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ============================================================================
// Message
// ============================================================================

/// An envelope carrying a command, query or event payload.
///
/// The identifier is generated on first read when none was assigned and never
/// changes afterwards. The content type is derived once from the payload's
/// concrete type.
#[derive(Debug, Clone)]
pub struct Message {
    id: OnceLock<Uuid>,
    kind: MessageKind,
    content_type: String,
    content: Payload,
    data: HashMap<String, String>,
    error: Option<Failure>,
    error_message: Option<String>,
    error_type: Option<String>,
    created_at: DateTime<Utc>,
    execution_duration_ms: u64,
    status: ProcessingStatus,
}

impl Message {
    /// Creates a message of `kind` wrapping `content`.
    pub fn new(kind: MessageKind, content: Payload) -> Self {
        Self {
            id: OnceLock::new(),
            kind,
            content_type: content.type_name().to_string(),
            content,
            data: HashMap::new(),
            error: None,
            error_message: None,
            error_type: None,
            created_at: Utc::now(),
            execution_duration_ms: 0,
            status: ProcessingStatus::NotInitialized,
        }
    }

    /// Creates a command message.
    pub fn command<T: Serialize + Send + Sync + 'static>(content: T) -> Self {
        Self::new(MessageKind::Command, Payload::new(content))
    }

    /// Creates a query message.
    pub fn query<T: Serialize + Send + Sync + 'static>(content: T) -> Self {
        Self::new(MessageKind::Query, Payload::new(content))
    }

    /// Creates an event message.
    pub fn event<T: Serialize + Send + Sync + 'static>(content: T) -> Self {
        Self::new(MessageKind::Event, Payload::new(content))
    }

    /// Assigns the identifier. Ignored if the identifier was already read.
    pub fn with_id(self, id: Uuid) -> Self {
        let _ = self.id.set(id);
        self
    }

    /// Adds an auxiliary data entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Returns the identifier, generating it on first call.
    pub fn id(&self) -> Uuid {
        *self.id.get_or_init(Uuid::new_v4)
    }

    /// Returns the message kind.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Returns the content type identifier.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Returns the payload.
    pub fn content(&self) -> &Payload {
        &self.content
    }

    /// Returns the auxiliary data.
    pub fn data(&self) -> &HashMap<String, String> {
        &self.data
    }

    /// Returns the auxiliary data for modification.
    pub fn data_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.data
    }

    /// Returns the captured error object, if any.
    pub fn error(&self) -> Option<&Failure> {
        self.error.as_ref()
    }

    /// Returns the captured error text, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns the captured error type name, if any.
    pub fn error_type(&self) -> Option<&str> {
        self.error_type.as_deref()
    }

    /// Records a captured error and its text and type name.
    pub fn set_error(&mut self, failure: Failure) {
        self.error_message = Some(failure.message());
        self.error_type = Some(failure.type_name().to_string());
        self.error = Some(failure);
    }

    /// Returns the creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the execution duration in milliseconds.
    pub fn execution_duration_ms(&self) -> u64 {
        self.execution_duration_ms
    }

    /// Sets the execution duration in milliseconds.
    pub fn set_execution_duration_ms(&mut self, ms: u64) {
        self.execution_duration_ms = ms;
    }

    /// Returns the processing status.
    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    /// Sets the processing status.
    pub fn set_status(&mut self, status: ProcessingStatus) {
        self.status = status;
    }

    pub(crate) fn into_parts(self) -> MessageParts {
        let id = self.id();
        MessageParts {
            id,
            kind: self.kind,
            content_type: self.content_type,
            content: self.content,
            data: self.data,
            created_at: self.created_at,
        }
    }

    pub(crate) fn from_parts(parts: MessageParts) -> Self {
        let id = OnceLock::new();
        let _ = id.set(parts.id);
        Self {
            id,
            kind: parts.kind,
            content_type: parts.content_type,
            content: parts.content,
            data: parts.data,
            error: None,
            error_message: None,
            error_type: None,
            created_at: parts.created_at,
            execution_duration_ms: 0,
            status: ProcessingStatus::NotInitialized,
        }
    }
}

/// Fields shared by [`Message`] and
/// [`MessageContext`](super::context::MessageContext).
pub(crate) struct MessageParts {
    pub(crate) id: Uuid,
    pub(crate) kind: MessageKind,
    pub(crate) content_type: String,
    pub(crate) content: Payload,
    pub(crate) data: HashMap<String, String>,
    pub(crate) created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct CreateOrder {
        sku: String,
    }

    #[test]
    fn test_id_is_generated_once() {
        let message = Message::command(CreateOrder { sku: "A-1".into() });
        let first = message.id();
        assert_eq!(first, message.id());
    }

    #[test]
    fn test_with_id_is_ignored_after_materialization() {
        let assigned = Uuid::new_v4();
        let message = Message::command(CreateOrder { sku: "A-1".into() });
        let generated = message.id();
        let message = message.with_id(assigned);
        assert_eq!(message.id(), generated);
    }

    #[test]
    fn test_content_type_and_simple_name() {
        let message = Message::query(CreateOrder { sku: "A-1".into() });
        assert!(message.content_type().ends_with("CreateOrder"));
        assert_eq!(message.content().simple_name(), "CreateOrder");
        assert_eq!(simple_type_name("a::b::Wrapper<a::Inner>"), "Wrapper");
    }

    #[test]
    fn test_payload_snapshot() {
        let payload = Payload::new(CreateOrder { sku: "A-1".into() });
        assert_eq!(payload.to_json(), Some(serde_json::json!({ "sku": "A-1" })));
        assert!(Payload::opaque(5_u32).to_json().is_none());
        assert_eq!(payload.downcast_ref::<CreateOrder>().map(|c| c.sku.as_str()), Some("A-1"));
        assert!(payload.downcast_arc::<u32>().is_none());
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Command".parse::<MessageKind>(), Ok(MessageKind::Command));
        assert_eq!("3".parse::<MessageKind>(), Ok(MessageKind::Event));
        assert!("9".parse::<MessageKind>().is_err());
        assert_eq!(MessageKind::Query.code(), 2);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("completed".parse(), Ok(ProcessingStatus::Completed));
        assert_eq!("REJECTED".parse(), Ok(ProcessingStatus::Rejected));
        assert!(ProcessingStatus::Failed.is_terminal());
        assert!(!ProcessingStatus::Processing.is_terminal());
    }
}
