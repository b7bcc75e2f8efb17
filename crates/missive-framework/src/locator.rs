//! Handler location.
//!
//! The [`HandlerLocator`] middleware maps the content type of a message to the
//! handler type registered for it and stores the answer in the context as a
//! [`LocatedHandler`].
//!
//! Two strategies are supported:
//!
//! - [`LocatorStrategy::Marker`]: types marked for the message kind that
//!   declare a method for the content type.
//! - [`LocatorStrategy::NamingConvention`]: the type whose simple name is the
//!   content's simple name followed by a suffix (`Deposit` → `DepositHandlers`).
//!
//! Routes are computed from the catalog when the locator is created and
//! again whenever the strategy changes.

use std::any::TypeId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;

use missive_core::{ConfigurationError, MessageContext, MessageKind, Middleware, PipelineResult};
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::catalog::HandlerCatalog;

/// Default suffix of the naming convention.
pub const DEFAULT_SUFFIX: &str = "Handlers";

/// How the locator discovers handler types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocatorStrategy {
    /// Types marked for the message kind declaring a method for the content.
    Marker,
    /// Types named after the content plus `suffix`.
    NamingConvention {
        /// Appended to the content's simple name.
        suffix: String,
    },
}

impl LocatorStrategy {
    /// The naming convention with the default suffix.
    pub fn naming_convention() -> Self {
        Self::NamingConvention {
            suffix: DEFAULT_SUFFIX.to_string(),
        }
    }
}

impl Default for LocatorStrategy {
    fn default() -> Self {
        Self::Marker
    }
}

/// The handler type chosen for the message in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocatedHandler {
    /// `TypeId` of the handler type.
    pub type_id: TypeId,
    /// Full type name of the handler type.
    pub type_name: &'static str,
}

// ============================================================================
// Routes
// ============================================================================

enum Routes {
    Empty,
    /// Keyed by message kind and content `TypeId`.
    Marker(HashMap<(MessageKind, TypeId), LocatedHandler>),
    /// Keyed by handler simple name.
    Named {
        suffix: String,
        by_name: HashMap<&'static str, LocatedHandler>,
    },
}

impl Routes {
    fn scan(catalog: &HandlerCatalog, strategy: &LocatorStrategy) -> Self {
        match strategy {
            LocatorStrategy::Marker => {
                let mut routes = HashMap::new();
                for descriptor in catalog.descriptors() {
                    let located = LocatedHandler {
                        type_id: descriptor.type_id(),
                        type_name: descriptor.type_name(),
                    };
                    for kind in MessageKind::ALL {
                        if !descriptor.is_marked(kind) {
                            continue;
                        }
                        for method in descriptor.methods() {
                            match routes.entry((kind, method.message())) {
                                Entry::Vacant(slot) => {
                                    slot.insert(located);
                                }
                                Entry::Occupied(kept) => warn!(
                                    content_type = method.message_name(),
                                    kept = kept.get().type_name,
                                    ignored = located.type_name,
                                    "Several marked handlers for one content type, using first"
                                ),
                            }
                        }
                    }
                }
                Self::Marker(routes)
            }
            LocatorStrategy::NamingConvention { suffix } => {
                let by_name = catalog
                    .descriptors()
                    .iter()
                    .filter(|d| d.simple_name().ends_with(suffix.as_str()))
                    .map(|d| {
                        (
                            d.simple_name(),
                            LocatedHandler {
                                type_id: d.type_id(),
                                type_name: d.type_name(),
                            },
                        )
                    })
                    .fold(HashMap::new(), |mut map, (name, located)| {
                        map.entry(name).or_insert(located);
                        map
                    });
                Self::Named {
                    suffix: suffix.clone(),
                    by_name,
                }
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Marker(routes) => routes.len(),
            Self::Named { by_name, .. } => by_name.len(),
        }
    }

    fn find(&self, ctx: &MessageContext) -> Option<LocatedHandler> {
        match self {
            Self::Empty => None,
            Self::Marker(routes) => routes.get(&(ctx.kind(), ctx.content().type_id())).copied(),
            Self::Named { suffix, by_name } => {
                let name = format!("{}{}", ctx.content().simple_name(), suffix);
                by_name.get(name.as_str()).copied()
            }
        }
    }
}

// ============================================================================
// HandlerLocator
// ============================================================================

/// Middleware that finds the handler type for each message.
pub struct HandlerLocator {
    catalog: Arc<HandlerCatalog>,
    strategy: RwLock<LocatorStrategy>,
    routes: RwLock<Routes>,
}

impl HandlerLocator {
    /// Middleware id.
    pub const ID: &'static str = "handler-locator";

    /// Creates a locator using [`LocatorStrategy::Marker`].
    pub fn new(catalog: Arc<HandlerCatalog>) -> Self {
        Self::with_strategy(catalog, LocatorStrategy::default())
    }

    /// Creates a locator with the given strategy.
    pub fn with_strategy(catalog: Arc<HandlerCatalog>, strategy: LocatorStrategy) -> Self {
        let locator = Self {
            catalog,
            strategy: RwLock::new(strategy),
            routes: RwLock::new(Routes::Empty),
        };
        locator.rescan();
        locator
    }

    /// Returns the current strategy.
    pub fn strategy(&self) -> LocatorStrategy {
        self.strategy.read().clone()
    }

    /// Switches the strategy and rescans the catalog.
    pub fn set_strategy(&self, strategy: LocatorStrategy) {
        *self.strategy.write() = strategy;
        self.rescan();
    }

    /// Locates the handler for `ctx` without modifying it.
    pub fn locate(&self, ctx: &MessageContext) -> PipelineResult<LocatedHandler> {
        self.routes.read().find(ctx).ok_or_else(|| {
            ConfigurationError::HandlerNotFound {
                content_type: ctx.content_type().to_string(),
            }
            .into()
        })
    }

    fn rescan(&self) {
        let strategy = self.strategy.read().clone();
        let routes = Routes::scan(&self.catalog, &strategy);
        debug!(?strategy, routes = routes.len(), "Scanned handler catalog");
        *self.routes.write() = routes;
    }
}

impl Middleware for HandlerLocator {
    fn id(&self) -> &str {
        Self::ID
    }

    fn handle(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        let located = self.locate(ctx)?;
        trace!(handler = located.type_name, "Located handler");
        ctx.set_item(located);
        Ok(())
    }
}

impl fmt::Debug for HandlerLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerLocator")
            .field("strategy", &*self.strategy.read())
            .field("routes", &self.routes.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_core::{Message, PipelineError};

    #[derive(Debug, serde::Serialize)]
    struct Deposit(u64);

    #[derive(Debug, serde::Serialize)]
    struct Withdraw(u64);

    struct DepositHandlers;
    struct LedgerHandlers;

    impl DepositHandlers {
        fn deposit(&self, _cmd: std::sync::Arc<Deposit>) {}
    }

    impl LedgerHandlers {
        fn withdraw(&self, _cmd: std::sync::Arc<Withdraw>) {}
    }

    fn catalog() -> Arc<HandlerCatalog> {
        let mut catalog = HandlerCatalog::new();
        catalog
            .register::<DepositHandlers>()
            .handles::<Deposit, _, _>(DepositHandlers::deposit);
        catalog
            .register::<LedgerHandlers>()
            .marker(MessageKind::Command)
            .handles::<Withdraw, _, _>(LedgerHandlers::withdraw);
        Arc::new(catalog)
    }

    #[test]
    fn test_marker_strategy() {
        let locator = HandlerLocator::new(catalog());

        let mut ctx = MessageContext::new(Message::command(Withdraw(5)));
        locator.handle(&mut ctx).unwrap();
        assert_eq!(
            ctx.get_item::<LocatedHandler>().unwrap().type_id,
            TypeId::of::<LedgerHandlers>()
        );

        // Unmarked types are invisible to the marker strategy.
        let ctx = MessageContext::new(Message::command(Deposit(5)));
        assert!(matches!(
            locator.locate(&ctx),
            Err(PipelineError::Configuration(ConfigurationError::HandlerNotFound { .. }))
        ));

        // Marked for commands only.
        let ctx = MessageContext::new(Message::event(Withdraw(5)));
        assert!(locator.locate(&ctx).is_err());
    }

    #[test]
    fn test_naming_convention_and_rescan() {
        let locator = HandlerLocator::new(catalog());
        let ctx = MessageContext::new(Message::event(Deposit(1)));
        assert!(locator.locate(&ctx).is_err());

        locator.set_strategy(LocatorStrategy::naming_convention());
        let located = locator.locate(&ctx).unwrap();
        assert_eq!(located.type_id, TypeId::of::<DepositHandlers>());

        locator.set_strategy(LocatorStrategy::NamingConvention {
            suffix: "Processor".into(),
        });
        assert!(locator.locate(&ctx).is_err());
    }
}
