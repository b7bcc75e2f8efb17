//! Handler execution.
//!
//! [`HandlerExecutor`] calls the method of the resolved handler that accepts
//! the message content. Each (handler, message) pair is compiled once into a
//! [`CallStrategy`] holding the parameter bindings, and cached in a
//! [`CallCache`].
//!
//! A failure returned by the handler is not a pipeline error. It is captured
//! into the context so the middlewares after the executor still see the
//! failed attempt; the executor's post-action then rethrows it as a
//! [`ProcessingError`] when throw-on-fail is enabled.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use missive_core::{
    ConfigurationError, DependencyResolver, DispatchInfo, MessageContext, Middleware, Payload,
    PipelineResult, ProcessingError, ProcessingStatus,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::catalog::{CallFn, HandlerCatalog, HandlerInstance};
use crate::inject::{Arguments, Binding, method_bindings};
use crate::method::{Invocation, Outcome};
use crate::resolver::ResolvedHandler;

// ============================================================================
// Call strategies
// ============================================================================

/// Identity of a compiled call: handler type and message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub handler: TypeId,
    pub message: TypeId,
}

impl MethodKey {
    /// Returns `true` if the message is its own handler.
    pub fn is_self_handling(&self) -> bool {
        self.handler == self.message
    }
}

/// A compiled method call.
pub struct CallStrategy {
    handler: &'static str,
    message: &'static str,
    bindings: Vec<Binding>,
    asynchronous: bool,
    call: Arc<CallFn>,
}

impl CallStrategy {
    /// Type name of the handler.
    pub fn handler(&self) -> &'static str {
        self.handler
    }

    /// Type name of the message.
    pub fn message(&self) -> &'static str {
        self.message
    }

    /// Where each parameter receives its value from.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn is_async(&self) -> bool {
        self.asynchronous
    }

    /// Binds the arguments and starts the call.
    pub fn invoke(
        &self,
        instance: HandlerInstance,
        payload: &Payload,
        resolver: &dyn DependencyResolver,
        token: &CancellationToken,
    ) -> PipelineResult<Invocation> {
        let args = Arguments::new(&self.bindings, payload, resolver, token);
        (self.call)(instance, &args)
    }
}

impl fmt::Debug for CallStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallStrategy")
            .field("handler", &self.handler)
            .field("message", &self.message)
            .field("bindings", &self.bindings)
            .field("asynchronous", &self.asynchronous)
            .finish()
    }
}

/// Compiled calls keyed by [`MethodKey`].
///
/// Compute-or-reuse: a racing compilation is discarded in favor of the entry
/// stored first.
#[derive(Default)]
pub struct CallCache {
    strategies: DashMap<MethodKey, Arc<CallStrategy>>,
}

impl CallCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the strategy for `key`, compiling it from `catalog` on first
    /// use. `content_type` only names the message in errors.
    pub fn get_or_compile(
        &self,
        catalog: &HandlerCatalog,
        key: MethodKey,
        content_type: &str,
    ) -> PipelineResult<Arc<CallStrategy>> {
        if let Some(strategy) = self.strategies.get(&key) {
            return Ok(strategy.value().clone());
        }

        let strategy = Arc::new(compile(catalog, key, content_type)?);
        trace!(
            handler = strategy.handler,
            message = strategy.message,
            bindings = ?strategy.bindings,
            "Compiled handler call"
        );
        Ok(self.strategies.entry(key).or_insert(strategy).value().clone())
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn clear(&self) {
        self.strategies.clear();
    }
}

impl fmt::Debug for CallCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallCache")
            .field("strategies", &self.strategies.len())
            .finish()
    }
}

fn compile(
    catalog: &HandlerCatalog,
    key: MethodKey,
    content_type: &str,
) -> PipelineResult<CallStrategy> {
    let descriptor = catalog
        .get(key.handler)
        .ok_or_else(|| ConfigurationError::HandlerNotResolved {
            content_type: content_type.to_string(),
        })?;
    let method = descriptor
        .method(key.message)
        .ok_or_else(|| ConfigurationError::MethodNotFound {
            handler: descriptor.type_name(),
            content_type: content_type.to_string(),
        })?;

    Ok(CallStrategy {
        handler: descriptor.type_name(),
        message: method.message_name(),
        bindings: method_bindings(method.params(), key.is_self_handling()),
        asynchronous: method.is_async(),
        call: method.call(),
    })
}

// ============================================================================
// HandlerExecutor
// ============================================================================

/// Middleware that invokes the resolved handler.
pub struct HandlerExecutor {
    catalog: Arc<HandlerCatalog>,
    cache: Arc<CallCache>,
    throw_on_fail: bool,
}

impl HandlerExecutor {
    /// Middleware id.
    pub const ID: &'static str = "handler-executor";

    /// Creates an executor with its own cache and throw-on-fail enabled.
    pub fn new(catalog: Arc<HandlerCatalog>) -> Self {
        Self::with_cache(catalog, Arc::new(CallCache::new()))
    }

    /// Creates an executor sharing `cache`.
    pub fn with_cache(catalog: Arc<HandlerCatalog>, cache: Arc<CallCache>) -> Self {
        Self {
            catalog,
            cache,
            throw_on_fail: true,
        }
    }

    /// Whether the post-action rethrows a captured failure.
    pub fn throw_on_fail(mut self, enabled: bool) -> Self {
        self.throw_on_fail = enabled;
        self
    }

    pub fn cache(&self) -> &Arc<CallCache> {
        &self.cache
    }

    /// Looks up the handler and its compiled call, or `None` when the
    /// message was rejected before execution.
    fn prepare(
        &self,
        ctx: &MessageContext,
    ) -> PipelineResult<Option<(ResolvedHandler, Arc<CallStrategy>)>> {
        if ctx.status() == ProcessingStatus::Rejected {
            debug!("Message rejected, skipping handler");
            return Ok(None);
        }

        let resolved = ctx.get_item::<ResolvedHandler>().ok_or_else(|| {
            ConfigurationError::HandlerNotResolved {
                content_type: ctx.content_type().to_string(),
            }
        })?;
        let key = MethodKey {
            handler: resolved.type_id,
            message: ctx.content().type_id(),
        };
        let strategy = self
            .cache
            .get_or_compile(&self.catalog, key, ctx.content_type())?;
        Ok(Some((resolved, strategy)))
    }

    fn complete(
        &self,
        ctx: &mut MessageContext,
        strategy: &CallStrategy,
        outcome: Outcome,
        started: Instant,
    ) {
        ctx.set_execution_duration(started.elapsed());

        match outcome {
            Ok(output) => {
                trace!(handler = strategy.handler, "Handler completed");
                if let Some(output) = output {
                    ctx.set_item(output);
                }
                ctx.set_status(ProcessingStatus::Completed);
            }
            Err(failure) => {
                warn!(
                    handler = strategy.handler,
                    error_type = failure.type_name(),
                    error = %failure,
                    "Handler failed"
                );
                ctx.set_item(DispatchInfo {
                    handler: strategy.handler,
                    content_type: ctx.content_type().to_string(),
                    asynchronous: strategy.asynchronous,
                    captured_at: Utc::now(),
                });
                ctx.fail(failure);
            }
        }
    }
}

#[async_trait]
impl Middleware for HandlerExecutor {
    fn id(&self) -> &str {
        Self::ID
    }

    fn handle(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        let Some((resolved, strategy)) = self.prepare(ctx)? else {
            return Ok(());
        };

        let started = Instant::now();
        let token = CancellationToken::new();
        let outcome = strategy
            .invoke(resolved.instance, ctx.content(), resolved.resolver.as_ref(), &token)?
            .wait();
        self.complete(ctx, &strategy, outcome, started);
        Ok(())
    }

    fn supports_async(&self) -> bool {
        true
    }

    async fn handle_async(
        &self,
        ctx: &mut MessageContext,
        token: &CancellationToken,
    ) -> PipelineResult<()> {
        let Some((resolved, strategy)) = self.prepare(ctx)? else {
            return Ok(());
        };

        let started = Instant::now();
        let invocation =
            strategy.invoke(resolved.instance, ctx.content(), resolved.resolver.as_ref(), token)?;
        let outcome = invocation.resolve().await;
        self.complete(ctx, &strategy, outcome, started);
        Ok(())
    }

    fn has_post_action(&self) -> bool {
        true
    }

    fn post_handle(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        if !self.throw_on_fail {
            return Ok(());
        }
        let Some(failure) = ctx.failure().cloned() else {
            return Ok(());
        };
        Err(ProcessingError::new(
            ctx.id(),
            ctx.content_type(),
            failure,
            ctx.get_item::<DispatchInfo>(),
        )
        .into())
    }

    fn dispose(&self) {
        self.cache.clear();
    }
}

impl fmt::Debug for HandlerExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerExecutor")
            .field("cache", &self.cache)
            .field("throw_on_fail", &self.throw_on_fail)
            .finish()
    }
}
