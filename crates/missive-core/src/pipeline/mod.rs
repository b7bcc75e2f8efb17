//! Ordered middleware pipeline.
//!
//! A [`Pipeline`] holds an ordered list of [`Middleware`]s and drives a
//! [`MessageContext`] through them:
//!
//! ```text
//!  invoke ──► handle(m1) ──► handle(m2) ──► handle(m3)
//!                                               │
//!  return ◄── post(m1) ◄──── post(m3) ◄─────────┘   (post-action capable only)
//! ```
//!
//! The list is replaced wholesale, never mutated in place: a dispatch that
//! already took a snapshot of the compiled chains keeps running against it
//! while a reconfiguration installs a new list. Chains are compiled lazily on
//! the first dispatch after a change.

mod chain;
mod middleware;

pub use middleware::{BoxedMiddleware, FnMiddleware, Middleware, from_fn};

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, debug, span};

use crate::foundation::context::MessageContext;
use crate::foundation::error::{ConfigurationError, PipelineResult};
use crate::foundation::message::ProcessingStatus;
use chain::Chains;

#[derive(Default)]
struct PipelineState {
    middlewares: Arc<[BoxedMiddleware]>,
    chains: Option<Arc<Chains>>,
}

/// An ordered chain of middlewares shared by cheap clones.
///
/// Cloning a `Pipeline` yields another handle to the same middleware list.
#[derive(Clone, Default)]
pub struct Pipeline {
    state: Arc<RwLock<PipelineState>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pipeline with the given middlewares.
    pub fn with_middlewares(middlewares: Vec<BoxedMiddleware>) -> PipelineResult<Self> {
        let pipeline = Self::new();
        pipeline.set_middlewares(middlewares)?;
        Ok(pipeline)
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Replaces the middleware list and invalidates the compiled chains.
    ///
    /// Fails with [`ConfigurationError::DuplicateMiddleware`] if two
    /// middlewares share an id; the previous list is kept in that case.
    pub fn set_middlewares(&self, middlewares: Vec<BoxedMiddleware>) -> PipelineResult<()> {
        let mut seen = HashSet::new();
        for m in &middlewares {
            if !seen.insert(m.id()) {
                return Err(ConfigurationError::DuplicateMiddleware {
                    id: m.id().to_string(),
                }
                .into());
            }
        }

        let mut state = self.state.write();
        state.middlewares = middlewares.into();
        state.chains = None;
        Ok(())
    }

    /// Returns a snapshot of the middleware list.
    pub fn middlewares(&self) -> Arc<[BoxedMiddleware]> {
        self.state.read().middlewares.clone()
    }

    /// Returns the ids of the middlewares, in order.
    pub fn ids(&self) -> Vec<String> {
        self.middlewares().iter().map(|m| m.id().to_string()).collect()
    }

    /// Returns the number of middlewares.
    pub fn len(&self) -> usize {
        self.state.read().middlewares.len()
    }

    /// Returns `true` if there are no middlewares.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up a middleware by id.
    pub fn middleware(&self, id: &str) -> PipelineResult<BoxedMiddleware> {
        self.middlewares()
            .iter()
            .find(|m| m.id() == id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    /// Replaces the middleware with the given id, keeping its position.
    pub fn replace_middleware(&self, id: &str, middleware: BoxedMiddleware) -> PipelineResult<()> {
        let mut list = self.middlewares().to_vec();
        let slot = list
            .iter_mut()
            .find(|m| m.id() == id)
            .ok_or_else(|| not_found(id))?;
        *slot = middleware;
        self.set_middlewares(list)
    }

    /// Removes the middleware with the given id and returns it.
    pub fn remove_middleware(&self, id: &str) -> PipelineResult<BoxedMiddleware> {
        let mut list = self.middlewares().to_vec();
        let index = list
            .iter()
            .position(|m| m.id() == id)
            .ok_or_else(|| not_found(id))?;
        let removed = list.remove(index);
        self.set_middlewares(list)?;
        Ok(removed)
    }

    /// Appends a middleware.
    pub fn add_middleware(&self, middleware: BoxedMiddleware) -> PipelineResult<()> {
        let mut list = self.middlewares().to_vec();
        list.push(middleware);
        self.set_middlewares(list)
    }

    /// Disposes every middleware, then clears the list.
    pub fn dispose(&self) {
        let mut state = self.state.write();
        for m in state.middlewares.iter() {
            m.dispose();
        }
        state.middlewares = Arc::from(Vec::new());
        state.chains = None;
    }

    // ========================================================================
    // Execution
    // ========================================================================

    fn chains(&self) -> Arc<Chains> {
        if let Some(chains) = &self.state.read().chains {
            return chains.clone();
        }

        let mut state = self.state.write();
        if let Some(chains) = &state.chains {
            return chains.clone();
        }
        let chains = Arc::new(Chains::build(&state.middlewares));
        debug!(
            middlewares = state.middlewares.len(),
            steps = chains.len(),
            "Compiled middleware chains"
        );
        state.chains = Some(chains.clone());
        chains
    }

    /// Runs the synchronous chain over `ctx`.
    ///
    /// The first middleware error is returned as-is and the remaining steps,
    /// post-actions included, do not run.
    pub fn invoke(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        let chains = self.chains();
        let span = span!(
            Level::DEBUG,
            "dispatch",
            message_id = %ctx.id(),
            content_type = %ctx.content().simple_name(),
        );
        let _enter = span.enter();

        ctx.set_status(ProcessingStatus::Processing);
        ctx.attach_pipeline(self.clone());
        chains.run(ctx)
    }

    /// Runs the asynchronous chain over `ctx`.
    ///
    /// Steps are awaited one after another. `token` is checked before each
    /// step and handed to async-capable middlewares; cancellation is
    /// cooperative and never interrupts a running step.
    pub async fn invoke_async(
        &self,
        ctx: &mut MessageContext,
        token: &CancellationToken,
    ) -> PipelineResult<()> {
        let chains = self.chains();
        let span = span!(
            Level::DEBUG,
            "dispatch",
            message_id = %ctx.id(),
            content_type = %ctx.content().simple_name(),
        );

        ctx.set_status(ProcessingStatus::Processing);
        ctx.attach_pipeline(self.clone());
        chains.run_async(ctx, token).instrument(span).await
    }
}

fn not_found(id: &str) -> crate::foundation::error::PipelineError {
    ConfigurationError::MiddlewareNotFound { id: id.to_string() }.into()
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("middlewares", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::error::PipelineError;
    use crate::foundation::message::Message;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, serde::Serialize)]
    struct Ping;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Probe {
        id: String,
        journal: Journal,
        post: bool,
        asynchronous: bool,
        fail: bool,
        disposed: Arc<AtomicUsize>,
    }

    impl Probe {
        fn new(id: &str, journal: &Journal) -> Self {
            Self {
                id: id.to_string(),
                journal: journal.clone(),
                post: false,
                asynchronous: false,
                fail: false,
                disposed: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_post(mut self) -> Self {
            self.post = true;
            self
        }

        fn with_async(mut self) -> Self {
            self.asynchronous = true;
            self
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn boxed(self) -> BoxedMiddleware {
            Arc::new(self)
        }
    }

    #[async_trait]
    impl Middleware for Probe {
        fn id(&self) -> &str {
            &self.id
        }

        fn handle(&self, _ctx: &mut MessageContext) -> PipelineResult<()> {
            self.journal.lock().push(format!("{}:handle", self.id));
            if self.fail {
                return Err(PipelineError::middleware(&self.id, io::Error::other("boom")));
            }
            Ok(())
        }

        fn supports_async(&self) -> bool {
            self.asynchronous
        }

        async fn handle_async(
            &self,
            _ctx: &mut MessageContext,
            _token: &CancellationToken,
        ) -> PipelineResult<()> {
            tokio::task::yield_now().await;
            self.journal.lock().push(format!("{}:async", self.id));
            Ok(())
        }

        fn has_post_action(&self) -> bool {
            self.post
        }

        fn post_handle(&self, _ctx: &mut MessageContext) -> PipelineResult<()> {
            self.journal.lock().push(format!("{}:post", self.id));
            Ok(())
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().clone()
    }

    #[test]
    fn test_handles_in_order_then_posts_in_reverse() {
        let journal = Journal::default();
        let pipeline = Pipeline::with_middlewares(vec![
            Probe::new("a", &journal).with_post().boxed(),
            Probe::new("b", &journal).boxed(),
            Probe::new("c", &journal).with_post().boxed(),
        ])
        .unwrap();

        let mut ctx = MessageContext::new(Message::command(Ping));
        pipeline.invoke(&mut ctx).unwrap();

        assert_eq!(
            entries(&journal),
            ["a:handle", "b:handle", "c:handle", "c:post", "a:post"]
        );
        assert_eq!(ctx.status(), ProcessingStatus::Processing);
        assert!(ctx.pipeline().is_some());
    }

    #[test]
    fn test_error_aborts_remaining_chain() {
        let journal = Journal::default();
        let pipeline = Pipeline::with_middlewares(vec![
            Probe::new("a", &journal).with_post().boxed(),
            Probe::new("b", &journal).failing().boxed(),
            Probe::new("c", &journal).boxed(),
        ])
        .unwrap();

        let mut ctx = MessageContext::new(Message::command(Ping));
        let err = pipeline.invoke(&mut ctx).unwrap_err();

        assert!(matches!(err, PipelineError::Middleware { ref id, .. } if id == "b"));
        assert_eq!(entries(&journal), ["a:handle", "b:handle"]);
    }

    #[tokio::test]
    async fn test_async_chain_mixes_sync_and_async() {
        let journal = Journal::default();
        let pipeline = Pipeline::with_middlewares(vec![
            Probe::new("a", &journal).with_post().boxed(),
            Probe::new("b", &journal).with_async().boxed(),
        ])
        .unwrap();

        let mut ctx = MessageContext::new(Message::command(Ping));
        pipeline
            .invoke_async(&mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(entries(&journal), ["a:handle", "b:async", "a:post"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_step() {
        let journal = Journal::default();
        let pipeline =
            Pipeline::with_middlewares(vec![Probe::new("a", &journal).boxed()]).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let mut ctx = MessageContext::new(Message::command(Ping));
        let err = pipeline.invoke_async(&mut ctx, &token).await.unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled));
        assert!(entries(&journal).is_empty());
    }

    #[test]
    fn test_reconfiguration_rebuilds_chain() {
        let journal = Journal::default();
        let pipeline =
            Pipeline::with_middlewares(vec![Probe::new("a", &journal).boxed()]).unwrap();
        pipeline
            .invoke(&mut MessageContext::new(Message::command(Ping)))
            .unwrap();

        pipeline
            .add_middleware(Probe::new("b", &journal).with_post().boxed())
            .unwrap();
        pipeline
            .replace_middleware("a", Probe::new("a2", &journal).boxed())
            .unwrap();
        pipeline
            .invoke(&mut MessageContext::new(Message::command(Ping)))
            .unwrap();

        assert_eq!(
            entries(&journal),
            ["a:handle", "a2:handle", "b:handle", "b:post"]
        );
        assert_eq!(pipeline.ids(), ["a2", "b"]);
    }

    #[test]
    fn test_lookup_errors() {
        let journal = Journal::default();
        let pipeline =
            Pipeline::with_middlewares(vec![Probe::new("a", &journal).boxed()]).unwrap();

        assert!(pipeline.middleware("zzz").is_err_and(|e| e.is_configuration()));
        assert!(pipeline.remove_middleware("zzz").is_err());
        assert!(
            pipeline
                .replace_middleware("zzz", Probe::new("x", &journal).boxed())
                .is_err()
        );

        let duplicate = pipeline.add_middleware(Probe::new("a", &journal).boxed());
        assert!(matches!(
            duplicate,
            Err(PipelineError::Configuration(
                ConfigurationError::DuplicateMiddleware { .. }
            ))
        ));
        assert_eq!(pipeline.len(), 1);

        assert_eq!(pipeline.remove_middleware("a").unwrap().id(), "a");
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_dispose_clears_list() {
        let journal = Journal::default();
        let probe = Probe::new("a", &journal);
        let disposed = probe.disposed.clone();
        let pipeline = Pipeline::with_middlewares(vec![probe.boxed()]).unwrap();

        pipeline.dispose();

        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(pipeline.is_empty());
    }

    #[test]
    fn test_from_fn_middleware() {
        let pipeline = Pipeline::with_middlewares(vec![Arc::new(from_fn(
            "stamp",
            |ctx: &mut MessageContext| {
                ctx.data_mut().insert("stamped".into(), "yes".into());
                Ok(())
            },
        ))])
        .unwrap();

        let mut ctx = MessageContext::new(Message::command(Ping));
        pipeline.invoke(&mut ctx).unwrap();
        assert_eq!(ctx.data().get("stamped").map(String::as_str), Some("yes"));
    }
}
