//! In-flight dispatch state.
//!
//! A [`MessageContext`] is created per dispatch, handed by `&mut` to every
//! middleware in the chain, and discarded (or converted into a [`Message`] or
//! [`MessageRecord`](super::record::MessageRecord)) once the pipeline returns.
//!
//! Middlewares cooperate through the typed item bag: each value is keyed by
//! its own type, so a locator can leave a `LocatedHandler` that the resolver
//! reads, and the resolver a `ResolvedHandler` that the executor reads.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::Failure;
use super::message::{Message, MessageKind, MessageParts, Payload, ProcessingStatus};
use crate::pipeline::Pipeline;
use crate::resolver::{DependencyResolver, NullResolver};

/// Mutable state of one message traversing a pipeline.
pub struct MessageContext {
    id: Uuid,
    kind: MessageKind,
    content_type: String,
    content: Payload,
    data: HashMap<String, String>,
    created_at: DateTime<Utc>,
    status: ProcessingStatus,
    failure: Option<Failure>,
    execution_duration_ms: u64,
    resolver: Arc<dyn DependencyResolver>,
    pipeline: Option<Pipeline>,
    items: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl MessageContext {
    /// Creates a context for `message` that resolves no dependencies.
    pub fn new(message: Message) -> Self {
        Self::with_resolver(message, Arc::new(NullResolver))
    }

    /// Creates a context for `message` backed by `resolver`.
    pub fn with_resolver(message: Message, resolver: Arc<dyn DependencyResolver>) -> Self {
        let parts = message.into_parts();
        Self {
            id: parts.id,
            kind: parts.kind,
            content_type: parts.content_type,
            content: parts.content,
            data: parts.data,
            created_at: parts.created_at,
            status: ProcessingStatus::NotInitialized,
            failure: None,
            execution_duration_ms: 0,
            resolver,
            pipeline: None,
            items: HashMap::new(),
        }
    }

    // ─── Message fields ───────────────────────────────────────────────────────

    /// Returns the message identifier.
    pub fn id(&self) -> Uuid {
        self.id
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

    /// Returns the creation timestamp of the message.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // ─── Processing state ─────────────────────────────────────────────────────

    /// Returns the processing status.
    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    /// Sets the processing status.
    pub fn set_status(&mut self, status: ProcessingStatus) {
        self.status = status;
    }

    /// Returns the captured handler failure, if any.
    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Captures a handler failure and marks the context as failed.
    pub fn fail(&mut self, failure: Failure) {
        self.failure = Some(failure);
        self.status = ProcessingStatus::Failed;
    }

    /// Removes and returns the captured failure without touching the status.
    pub fn take_failure(&mut self) -> Option<Failure> {
        self.failure.take()
    }

    /// Returns the measured execution duration in milliseconds.
    pub fn execution_duration_ms(&self) -> u64 {
        self.execution_duration_ms
    }

    /// Sets the measured execution duration in milliseconds.
    pub fn set_execution_duration_ms(&mut self, ms: u64) {
        self.execution_duration_ms = ms;
    }

    /// Records `elapsed` as whole milliseconds, saturating at `u64::MAX`.
    pub fn set_execution_duration(&mut self, elapsed: Duration) {
        self.execution_duration_ms = whole_millis(elapsed);
    }

    // ─── Collaborators ────────────────────────────────────────────────────────

    /// Returns the dependency resolver.
    pub fn resolver(&self) -> &Arc<dyn DependencyResolver> {
        &self.resolver
    }

    /// Replaces the dependency resolver.
    pub fn set_resolver(&mut self, resolver: Arc<dyn DependencyResolver>) {
        self.resolver = resolver;
    }

    /// Returns the pipeline currently driving this context.
    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    pub(crate) fn attach_pipeline(&mut self, pipeline: Pipeline) {
        self.pipeline = Some(pipeline);
    }

    // ─── Item bag ─────────────────────────────────────────────────────────────

    /// Stores a value in the item bag.
    ///
    /// Only one value per type can be stored; subsequent calls overwrite.
    pub fn set_item<T: Send + Sync + 'static>(&mut self, value: T) {
        self.items.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Retrieves a cloned value from the item bag.
    pub fn get_item<T: Clone + 'static>(&self) -> Option<T> {
        self.item_ref::<T>().cloned()
    }

    /// Borrows a value from the item bag.
    pub fn item_ref<T: 'static>(&self) -> Option<&T> {
        self.items
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns `true` if a value of type `T` is in the item bag.
    pub fn has_item<T: 'static>(&self) -> bool {
        self.items.contains_key(&TypeId::of::<T>())
    }

    /// Removes and returns a value from the item bag.
    pub fn take_item<T: 'static>(&mut self) -> Option<T> {
        self.items
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    // ─── Conversion ───────────────────────────────────────────────────────────

    /// Builds a [`Message`] reflecting the current state of the context.
    ///
    /// The message shares the payload and the captured failure with the
    /// context.
    pub fn to_message(&self) -> Message {
        let mut message = Message::from_parts(MessageParts {
            id: self.id,
            kind: self.kind,
            content_type: self.content_type.clone(),
            content: self.content.clone(),
            data: self.data.clone(),
            created_at: self.created_at,
        });
        message.set_status(self.status);
        message.set_execution_duration_ms(self.execution_duration_ms);
        if let Some(failure) = &self.failure {
            message.set_error(failure.clone());
        }
        message
    }
}

impl From<Message> for MessageContext {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}

impl fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageContext")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("content_type", &self.content_type)
            .field("status", &self.status)
            .field("failure", &self.failure)
            .field("items", &self.items.len())
            .finish_non_exhaustive()
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
