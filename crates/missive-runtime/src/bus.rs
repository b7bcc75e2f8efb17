//! The message bus.
//!
//! [`MessageBus`] owns one [`Pipeline`] per [`MessageKind`], each assembled
//! from a [`PipelineConfig`]:
//!
//! ```text
//! tracing? → handler-locator → validation? → handler-resolver → handler-executor → recording?
//! ```
//!
//! All three pipelines share the handler catalog, the construction cache and
//! the call cache. Commands go through [`send`](MessageBus::send), queries
//! through [`query`](MessageBus::query) and events through
//! [`publish`](MessageBus::publish); each has an `_async` variant.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use missive_core::{
    BoxedMiddleware, CancellationToken, DependencyResolver, DispatchInfo, InMemoryRepository,
    Message, MessageContext, MessageKind, MessageRepository, NullResolver, Pipeline,
    PipelineError, ProcessingError, ProcessingStatus,
};
use missive_framework::{
    CallCache, ConstructionCache, HandlerCatalog, HandlerExecutor, HandlerLocator, HandlerOutput,
    HandlerResolver, RecordingMiddleware, TracingMiddleware, ValidationFailure,
    ValidationMiddleware,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{MissiveConfig, PipelineConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`MessageBus`].
///
/// ```rust,ignore
/// let services = Arc::new(ServiceRegistry::new());
/// services.singleton(Ledger::default());
///
/// let bus = MessageBus::builder()
///     .resolver(services)
///     .validation(ValidationMiddleware::new().rule(|d: &Deposit| d.check()))
///     .build()?;
/// ```
#[must_use]
pub struct MessageBusBuilder {
    catalog: Option<Arc<HandlerCatalog>>,
    resolver: Arc<dyn DependencyResolver>,
    config: PipelineConfig,
    validation: ValidationMiddleware,
    repository: Option<Arc<dyn MessageRepository>>,
}

impl Default for MessageBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBusBuilder {
    pub fn new() -> Self {
        Self {
            catalog: None,
            resolver: Arc::new(NullResolver),
            config: PipelineConfig::default(),
            validation: ValidationMiddleware::new(),
            repository: None,
        }
    }

    /// Uses `catalog` instead of collecting the registered handler modules.
    pub fn catalog(mut self, catalog: Arc<HandlerCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Sets the resolver attached to every dispatched context.
    pub fn resolver(mut self, resolver: Arc<dyn DependencyResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the rules checked when validation is enabled.
    pub fn validation(mut self, validation: ValidationMiddleware) -> Self {
        self.validation = validation;
        self
    }

    /// Sets the repository used when message recording is enabled.
    ///
    /// Defaults to an [`InMemoryRepository`].
    pub fn repository(mut self, repository: Arc<dyn MessageRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Assembles the pipelines.
    pub fn build(self) -> RuntimeResult<MessageBus> {
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(HandlerCatalog::collect_all()));
        let repository = self.config.record_messages.then(|| {
            self.repository
                .unwrap_or_else(|| Arc::new(InMemoryRepository::new()))
        });

        let (commands, queries, events) = {
            let parts = Parts {
                catalog: &catalog,
                config: &self.config,
                validation: Arc::new(self.validation),
                construction: Arc::new(ConstructionCache::new()),
                calls: Arc::new(CallCache::new()),
                repository: repository.as_ref(),
            };
            (parts.assemble()?, parts.assemble()?, parts.assemble()?)
        };

        let bus = MessageBus {
            commands,
            queries,
            events,
            catalog,
            resolver: self.resolver,
            repository,
            shutdown: CancellationToken::new(),
        };

        info!(
            handlers = bus.catalog.len(),
            middlewares = ?bus.commands.ids(),
            "Message bus assembled"
        );
        Ok(bus)
    }
}

/// Everything shared by the three pipelines.
struct Parts<'a> {
    catalog: &'a Arc<HandlerCatalog>,
    config: &'a PipelineConfig,
    validation: Arc<ValidationMiddleware>,
    construction: Arc<ConstructionCache>,
    calls: Arc<CallCache>,
    repository: Option<&'a Arc<dyn MessageRepository>>,
}

impl Parts<'_> {
    fn assemble(&self) -> RuntimeResult<Pipeline> {
        let config = self.config;
        let mut middlewares: Vec<BoxedMiddleware> = Vec::with_capacity(6);

        if config.tracing {
            middlewares.push(Arc::new(TracingMiddleware::new()));
        }
        middlewares.push(Arc::new(HandlerLocator::with_strategy(
            self.catalog.clone(),
            config.locator.to_strategy(),
        )));
        if config.validation {
            middlewares.push(self.validation.clone());
        }
        middlewares.push(Arc::new(
            HandlerResolver::with_cache(self.catalog.clone(), self.construction.clone())
                .inject_properties(config.inject_properties)
                .use_internal_resolver(config.use_internal_resolver),
        ));
        middlewares.push(Arc::new(
            HandlerExecutor::with_cache(self.catalog.clone(), self.calls.clone())
                .throw_on_fail(config.throw_on_fail),
        ));
        if let Some(repository) = self.repository {
            middlewares.push(Arc::new(RecordingMiddleware::new(repository.clone())));
        }

        Ok(Pipeline::with_middlewares(middlewares)?)
    }
}

// =============================================================================
// MessageBus
// =============================================================================

/// Dispatches commands, queries and events through their pipelines.
pub struct MessageBus {
    catalog: Arc<HandlerCatalog>,
    resolver: Arc<dyn DependencyResolver>,
    commands: Pipeline,
    queries: Pipeline,
    events: Pipeline,
    repository: Option<Arc<dyn MessageRepository>>,
    shutdown: CancellationToken,
}

impl MessageBus {
    pub fn builder() -> MessageBusBuilder {
        MessageBusBuilder::new()
    }

    /// Initializes logging and assembles a bus over the registered handler
    /// modules.
    pub fn from_config(
        config: &MissiveConfig,
        resolver: Arc<dyn DependencyResolver>,
    ) -> RuntimeResult<Self> {
        crate::config::validate_config(config)?;
        logging::init_from_config(&config.logging);

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            "Runtime initialized from configuration"
        );

        Self::builder()
            .resolver(resolver)
            .config(config.pipeline.clone())
            .build()
    }

    pub fn catalog(&self) -> &Arc<HandlerCatalog> {
        &self.catalog
    }

    /// The pipeline serving `kind`.
    pub fn pipeline(&self, kind: MessageKind) -> &Pipeline {
        match kind {
            MessageKind::Command => &self.commands,
            MessageKind::Query => &self.queries,
            MessageKind::Event => &self.events,
        }
    }

    /// The repository receiving message records, when recording is enabled.
    pub fn repository(&self) -> Option<&Arc<dyn MessageRepository>> {
        self.repository.as_ref()
    }

    /// Wraps `message` in a context bound to the bus resolver.
    pub fn context(&self, message: Message) -> MessageContext {
        MessageContext::with_resolver(message, self.resolver.clone())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // ─── Raw contexts ─────────────────────────────────────────────────────────

    /// Runs `ctx` through the pipeline for its kind.
    ///
    /// A context rejected by validation yields [`RuntimeError::Rejected`];
    /// the context keeps its [`ValidationFailure`] item.
    pub fn dispatch(&self, ctx: &mut MessageContext) -> RuntimeResult<()> {
        self.ensure_running()?;
        self.pipeline(ctx.kind()).invoke(ctx)?;
        check_rejected(ctx)
    }

    /// Asynchronous [`dispatch`](Self::dispatch) observing `token`.
    pub async fn dispatch_async(
        &self,
        ctx: &mut MessageContext,
        token: &CancellationToken,
    ) -> RuntimeResult<()> {
        self.ensure_running()?;
        self.pipeline(ctx.kind()).invoke_async(ctx, token).await?;
        check_rejected(ctx)
    }

    // ─── Commands ─────────────────────────────────────────────────────────────

    /// Sends a command and returns the processed message.
    ///
    /// With throw-on-fail disabled a handler failure is reported through the
    /// returned message's status and error instead of an `Err`.
    pub fn send<T>(&self, command: T) -> RuntimeResult<Message>
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.deliver(Message::command(command))
    }

    pub async fn send_async<T>(&self, command: T) -> RuntimeResult<Message>
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.deliver_async(Message::command(command)).await
    }

    // ─── Queries ──────────────────────────────────────────────────────────────

    /// Runs a query and returns its result as `R`.
    pub fn query<Q, R>(&self, query: Q) -> RuntimeResult<R>
    where
        Q: Serialize + Send + Sync + 'static,
        R: 'static,
    {
        let mut ctx = self.context(Message::query(query));
        self.dispatch(&mut ctx)?;
        take_result(&mut ctx)
    }

    pub async fn query_async<Q, R>(&self, query: Q) -> RuntimeResult<R>
    where
        Q: Serialize + Send + Sync + 'static,
        R: 'static,
    {
        let mut ctx = self.context(Message::query(query));
        let token = self.shutdown.child_token();
        self.dispatch_async(&mut ctx, &token).await?;
        take_result(&mut ctx)
    }

    // ─── Events ───────────────────────────────────────────────────────────────

    /// Publishes an event and returns the processed message.
    pub fn publish<T>(&self, event: T) -> RuntimeResult<Message>
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.deliver(Message::event(event))
    }

    pub async fn publish_async<T>(&self, event: T) -> RuntimeResult<Message>
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.deliver_async(Message::event(event)).await
    }

    // ─── Lifecycle ────────────────────────────────────────────────────────────

    /// Disposes every pipeline and refuses further messages.
    ///
    /// Cancels the tokens handed to in-flight `_async` dispatches. Calling it
    /// again has no effect.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        for kind in MessageKind::ALL {
            self.pipeline(kind).dispose();
        }
        info!("Message bus shut down");
    }

    /// Waits for Ctrl+C, then shuts the bus down.
    pub async fn run_until_ctrl_c(&self) -> RuntimeResult<()> {
        info!("Message bus is running. Press Ctrl+C to stop.");
        tokio::signal::ctrl_c().await?;
        self.shutdown();
        Ok(())
    }

    /// Waits for `signal`, then shuts the bus down.
    pub async fn run_until<F>(&self, signal: F)
    where
        F: Future<Output = ()>,
    {
        signal.await;
        self.shutdown();
    }

    fn ensure_running(&self) -> RuntimeResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(RuntimeError::ShutDown);
        }
        Ok(())
    }

    fn deliver(&self, message: Message) -> RuntimeResult<Message> {
        let mut ctx = self.context(message);
        self.dispatch(&mut ctx)?;
        Ok(ctx.to_message())
    }

    async fn deliver_async(&self, message: Message) -> RuntimeResult<Message> {
        let mut ctx = self.context(message);
        let token = self.shutdown.child_token();
        self.dispatch_async(&mut ctx, &token).await?;
        Ok(ctx.to_message())
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("handlers", &self.catalog.len())
            .field("pipeline", &self.commands.ids())
            .field("recording", &self.repository.is_some())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn check_rejected(ctx: &MessageContext) -> RuntimeResult<()> {
    if ctx.status() != ProcessingStatus::Rejected {
        return Ok(());
    }
    let reasons = ctx
        .item_ref::<ValidationFailure>()
        .map(|failure| failure.reasons.clone())
        .unwrap_or_default();
    debug!(content_type = ctx.content_type(), ?reasons, "Message rejected");
    Err(RuntimeError::Rejected {
        content_type: ctx.content_type().to_string(),
        reasons,
    })
}

/// Takes the handler output as `R`.
///
/// A failure left in the context (throw-on-fail disabled) is surfaced as the
/// same [`ProcessingError`] the executor would have raised.
fn take_result<R: 'static>(ctx: &mut MessageContext) -> RuntimeResult<R> {
    if let Some(failure) = ctx.take_failure() {
        let dispatch = ctx.take_item::<DispatchInfo>();
        let error = ProcessingError::new(ctx.id(), ctx.content_type(), failure, dispatch);
        return Err(PipelineError::Processing(error).into());
    }

    let output = ctx
        .take_item::<HandlerOutput>()
        .ok_or_else(|| RuntimeError::NoResult {
            content_type: ctx.content_type().to_string(),
        })?;
    output.downcast::<R>().map_err(|output| RuntimeError::ResultType {
        content_type: ctx.content_type().to_string(),
        expected: std::any::type_name::<R>(),
        found: output.type_name(),
    })
}
