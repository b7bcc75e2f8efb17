use std::time::Instant;

use missive_core::{MessageContext, Middleware, PipelineResult, ProcessingStatus, whole_millis};
use tracing::{Level, debug, info, warn};

/// When the dispatch entered the pipeline.
#[derive(Debug, Clone, Copy)]
struct Started(Instant);

/// Logs every dispatch at its start and once the chain has run.
///
/// Register it first so its post-action runs last.
///
/// A post-action that returns an error stops the remaining ones, so with
/// throw-on-fail enabled a handler failure never reaches this middleware's
/// post-action. [`HandlerExecutor`](crate::HandlerExecutor) logs the failure
/// when it is captured; this middleware reports failed dispatches only when
/// they complete without a rethrow.
#[derive(Debug, Clone)]
pub struct TracingMiddleware {
    level: Level,
}

impl TracingMiddleware {
    /// Middleware id.
    pub const ID: &'static str = "tracing";

    /// Logs successful dispatches at `DEBUG`.
    pub fn new() -> Self {
        Self { level: Level::DEBUG }
    }

    /// Logs successful dispatches at `level` (`INFO` or `DEBUG`).
    pub fn with_level(level: Level) -> Self {
        Self { level }
    }
}

impl Default for TracingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl Middleware for TracingMiddleware {
    fn id(&self) -> &str {
        Self::ID
    }

    fn handle(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        debug!(
            message_id = %ctx.id(),
            kind = ctx.kind().as_str(),
            content_type = ctx.content().simple_name(),
            "Message received"
        );
        ctx.set_item(Started(Instant::now()));
        Ok(())
    }

    fn has_post_action(&self) -> bool {
        true
    }

    fn post_handle(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        let elapsed_ms = ctx
            .take_item::<Started>()
            .map(|started| whole_millis(started.0.elapsed()))
            .unwrap_or_default();

        match ctx.status() {
            ProcessingStatus::Failed => warn!(
                message_id = %ctx.id(),
                elapsed_ms,
                error_type = ctx.failure().map(|f| f.type_name()).unwrap_or_default(),
                "Message failed"
            ),
            ProcessingStatus::Rejected => warn!(
                message_id = %ctx.id(),
                elapsed_ms,
                "Message rejected"
            ),
            status if self.level == Level::INFO => info!(
                message_id = %ctx.id(),
                status = status.as_str(),
                elapsed_ms,
                "Message processed"
            ),
            status => debug!(
                message_id = %ctx.id(),
                status = status.as_str(),
                elapsed_ms,
                "Message processed"
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_core::{Failure, Message};
    use std::io;

    #[test]
    fn test_marker_is_released() {
        let middleware = TracingMiddleware::with_level(Level::INFO);
        let mut ctx = MessageContext::new(Message::event(3_u16));
        middleware.handle(&mut ctx).unwrap();
        assert!(ctx.has_item::<Started>());

        ctx.set_status(ProcessingStatus::Completed);
        middleware.post_handle(&mut ctx).unwrap();
        assert!(!ctx.has_item::<Started>());
    }

    #[test]
    fn test_failed_dispatch_is_reported_without_rethrow() {
        let middleware = TracingMiddleware::new();
        let mut ctx = MessageContext::new(Message::command(7_u8));
        middleware.handle(&mut ctx).unwrap();

        ctx.fail(Failure::new(io::Error::other("disk full")));
        assert!(middleware.post_handle(&mut ctx).is_ok());
        assert!(!ctx.has_item::<Started>());
        assert_eq!(ctx.status(), ProcessingStatus::Failed);
    }
}
