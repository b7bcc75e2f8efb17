//! The middleware contract.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::foundation::context::MessageContext;
use crate::foundation::error::PipelineResult;

/// A stage of a [`Pipeline`](super::Pipeline).
///
/// Every middleware has a synchronous [`handle`](Self::handle). The optional
/// capabilities are declared through flags and read once when the pipeline
/// compiles its chains, never per dispatch:
///
/// - [`supports_async`](Self::supports_async): the asynchronous chain awaits
///   [`handle_async`](Self::handle_async) instead of calling `handle`.
/// - [`has_post_action`](Self::has_post_action): [`post_handle`](Self::post_handle)
///   runs after the main chain, in reverse registration order.
///
/// Returning an error aborts the rest of the chain, post-actions included.
/// Handler failures are not middleware errors: executors capture them into
/// the context instead.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Stable identifier used for lookup and replacement.
    fn id(&self) -> &str;

    /// Processes the context on the synchronous path.
    fn handle(&self, ctx: &mut MessageContext) -> PipelineResult<()>;

    /// Returns `true` if [`handle_async`](Self::handle_async) should be awaited
    /// on the asynchronous path.
    fn supports_async(&self) -> bool {
        false
    }

    /// Processes the context on the asynchronous path.
    async fn handle_async(
        &self,
        ctx: &mut MessageContext,
        token: &CancellationToken,
    ) -> PipelineResult<()> {
        let _ = token;
        self.handle(ctx)
    }

    /// Returns `true` if [`post_handle`](Self::post_handle) should run.
    fn has_post_action(&self) -> bool {
        false
    }

    /// Runs after the main chain.
    fn post_handle(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Releases resources when the owning pipeline is disposed.
    fn dispose(&self) {}
}

/// A shared, type-erased middleware.
pub type BoxedMiddleware = Arc<dyn Middleware>;

// ============================================================================
// Closure middleware
// ============================================================================

/// A middleware built from a closure.
///
/// Created by [`from_fn`].
pub struct FnMiddleware<F> {
    id: String,
    f: F,
}

/// Creates a synchronous middleware from a closure.
///
/// # Example
///
/// ```rust,ignore
/// let stamp = from_fn("stamp", |ctx: &mut MessageContext| {
///     ctx.data_mut().insert("stamped".into(), "yes".into());
///     Ok(())
/// });
/// pipeline.add_middleware(Arc::new(stamp))?;
/// ```
pub fn from_fn<F>(id: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(&mut MessageContext) -> PipelineResult<()> + Send + Sync + 'static,
{
    FnMiddleware { id: id.into(), f }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut MessageContext) -> PipelineResult<()> + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn handle(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        (self.f)(ctx)
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
