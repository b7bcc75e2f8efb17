use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use missive_core::{MessageContext, Middleware, Payload, PipelineResult, ProcessingStatus};
use tracing::info;

type RuleFn = dyn Fn(&Payload) -> Result<(), String> + Send + Sync;

/// Why a message was rejected.
///
/// Stored in the context item bag when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub content_type: String,
    /// One entry per failed rule, in registration order.
    pub reasons: Vec<String>,
}

/// Rejects messages whose content breaks a registered rule.
///
/// Every rule registered for the content type runs. If any fails, the status
/// becomes [`ProcessingStatus::Rejected`] and the executor skips the handler.
///
/// # Example
///
/// ```rust,ignore
/// let validation = ValidationMiddleware::new()
///     .rule(|d: &Deposit| if d.amount > 0 { Ok(()) } else { Err("amount must be positive".into()) });
/// ```
#[derive(Default)]
pub struct ValidationMiddleware {
    rules: HashMap<TypeId, Vec<Arc<RuleFn>>>,
}

impl ValidationMiddleware {
    /// Middleware id.
    pub const ID: &'static str = "validation";

    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule for content of type `T`.
    pub fn rule<T, F>(mut self, rule: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        let erased: Arc<RuleFn> = Arc::new(move |payload: &Payload| match payload.downcast_ref::<T>() {
            Some(content) => rule(content),
            None => Err(format!("content is not a {}", type_name::<T>())),
        });
        self.rules.entry(TypeId::of::<T>()).or_default().push(erased);
        self
    }

    /// Runs the rules for `payload`, returning the failure reasons.
    pub fn check(&self, payload: &Payload) -> Vec<String> {
        self.rules
            .get(&payload.type_id())
            .into_iter()
            .flatten()
            .filter_map(|rule| rule(payload).err())
            .collect()
    }
}

impl Middleware for ValidationMiddleware {
    fn id(&self) -> &str {
        Self::ID
    }

    fn handle(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        let reasons = self.check(ctx.content());
        if reasons.is_empty() {
            return Ok(());
        }

        info!(
            message_id = %ctx.id(),
            content_type = ctx.content().simple_name(),
            ?reasons,
            "Message failed validation"
        );
        ctx.set_item(ValidationFailure {
            content_type: ctx.content_type().to_string(),
            reasons,
        });
        ctx.set_status(ProcessingStatus::Rejected);
        Ok(())
    }
}

impl fmt::Debug for ValidationMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationMiddleware")
            .field("rules", &self.rules.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
