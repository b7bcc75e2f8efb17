use std::fmt;
use std::sync::Arc;

use missive_core::{
    MessageContext, MessageRecord, MessageRepository, Middleware, PipelineError, PipelineResult,
};
use tracing::trace;

/// Appends a [`MessageRecord`] of every dispatch to a repository.
///
/// Register it after the executor: it records during the main chain, so a
/// failed attempt is stored before the executor's post-action rethrows it.
pub struct RecordingMiddleware {
    repository: Arc<dyn MessageRepository>,
}

impl RecordingMiddleware {
    /// Middleware id.
    pub const ID: &'static str = "recording";

    pub fn new(repository: Arc<dyn MessageRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> &Arc<dyn MessageRepository> {
        &self.repository
    }
}

impl Middleware for RecordingMiddleware {
    fn id(&self) -> &str {
        Self::ID
    }

    fn handle(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        let record = MessageRecord::from_context(ctx);
        trace!(message_id = %record.id, status = record.status.as_str(), "Recording message");
        self.repository
            .append(record)
            .map_err(|e| PipelineError::middleware(Self::ID, e))
    }
}

impl fmt::Debug for RecordingMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingMiddleware").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_core::{
        InMemoryRepository, Message, MessageQuery, ProcessingStatus, RepositoryError,
        RepositoryResult,
    };

    struct Offline;

    impl MessageRepository for Offline {
        fn append(&self, _record: MessageRecord) -> RepositoryResult<()> {
            Err(RepositoryError::Unavailable("offline".into()))
        }

        fn query(&self, _query: &MessageQuery) -> RepositoryResult<Vec<MessageRecord>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_records_context_snapshot() {
        let repository = Arc::new(InMemoryRepository::new());
        let recording = RecordingMiddleware::new(repository.clone());

        let mut ctx = MessageContext::new(Message::event("opened").with_data("branch", "north"));
        ctx.set_status(ProcessingStatus::Completed);
        recording.handle(&mut ctx).unwrap();

        let records = repository.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, ctx.id());
        assert_eq!(records[0].status, ProcessingStatus::Completed);
        assert_eq!(records[0].data["branch"], "north");
    }

    #[test]
    fn test_repository_error_is_middleware_error() {
        let recording = RecordingMiddleware::new(Arc::new(Offline));
        let mut ctx = MessageContext::new(Message::event(1_u8));
        assert!(matches!(
            recording.handle(&mut ctx),
            Err(PipelineError::Middleware { ref id, .. }) if id == RecordingMiddleware::ID
        ));
    }
}
