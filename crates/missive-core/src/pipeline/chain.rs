//! Compiled call chains.
//!
//! A pipeline compiles its middleware list into two flat step lists. The
//! capability flags of each middleware are read exactly once here, so a
//! dispatch only walks a vector.

use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::middleware::BoxedMiddleware;
use crate::foundation::context::MessageContext;
use crate::foundation::error::{PipelineError, PipelineResult};

/// A step of the synchronous chain.
enum SyncStep {
    Handle(BoxedMiddleware),
    Post(BoxedMiddleware),
}

/// A step of the asynchronous chain.
enum AsyncStep {
    /// Awaits `handle_async`.
    Await(BoxedMiddleware),
    /// Runs `handle` and resolves immediately.
    Blocking(BoxedMiddleware),
    Post(BoxedMiddleware),
}

/// The two chains compiled from one middleware list.
pub(crate) struct Chains {
    sync: Vec<SyncStep>,
    asynchronous: Vec<AsyncStep>,
}

impl Chains {
    pub(crate) fn build(middlewares: &[BoxedMiddleware]) -> Self {
        let posts: Vec<&BoxedMiddleware> = middlewares
            .iter()
            .rev()
            .filter(|m| m.has_post_action())
            .collect();

        let sync = middlewares
            .iter()
            .cloned()
            .map(SyncStep::Handle)
            .chain(posts.iter().map(|m| SyncStep::Post((*m).clone())))
            .collect();

        let asynchronous = middlewares
            .iter()
            .map(|m| {
                if m.supports_async() {
                    AsyncStep::Await(m.clone())
                } else {
                    AsyncStep::Blocking(m.clone())
                }
            })
            .chain(posts.iter().map(|m| AsyncStep::Post((*m).clone())))
            .collect();

        Self { sync, asynchronous }
    }

    /// Number of steps in each chain.
    pub(crate) fn len(&self) -> usize {
        self.sync.len()
    }

    pub(crate) fn run(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        for step in &self.sync {
            match step {
                SyncStep::Handle(m) => {
                    trace!(middleware = m.id(), "handle");
                    m.handle(ctx)?;
                }
                SyncStep::Post(m) => {
                    trace!(middleware = m.id(), "post_handle");
                    m.post_handle(ctx)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn run_async(
        &self,
        ctx: &mut MessageContext,
        token: &CancellationToken,
    ) -> PipelineResult<()> {
        for step in &self.asynchronous {
            if token.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            match step {
                AsyncStep::Await(m) => {
                    trace!(middleware = m.id(), "handle_async");
                    m.handle_async(ctx, token).await?;
                }
                AsyncStep::Blocking(m) => {
                    trace!(middleware = m.id(), "handle");
                    m.handle(ctx)?;
                }
                AsyncStep::Post(m) => {
                    trace!(middleware = m.id(), "post_handle");
                    m.post_handle(ctx)?;
                }
            }
        }
        Ok(())
    }
}
