//! Handler construction.
//!
//! [`HandlerResolver`] builds the located handler with its dependencies
//! injected. How to build a type is decided once per type by a
//! [`HandlerFactory`] and memoized in a [`ConstructionCache`].
//!
//! # Constructor selection
//!
//! When a type registers several constructors, the one with the **most
//! parameters** is used, and among equally long ones the first registered.
//! The richest constructor is assumed to express the full dependency set,
//! which can pick an unexpected overload: register only the constructors you
//! want considered.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use missive_core::{
    ConfigurationError, DependencyResolver, Instance, MessageContext, Middleware, PipelineResult,
    ResolveError, ResolveResult, ServiceKey,
};
use tracing::{debug, trace};

use crate::catalog::{
    ConstructorDescriptor, HandlerCatalog, HandlerDescriptor, HandlerInstance, PropertyDescriptor,
};
use crate::locator::LocatedHandler;

/// Maximum nesting of components built by a [`ConstructorResolver`].
pub const MAX_DEPTH: usize = 32;

// ============================================================================
// HandlerFactory
// ============================================================================

/// How to build one type: the chosen constructor and its injectable
/// properties.
pub struct HandlerFactory {
    type_name: &'static str,
    constructor: Option<ConstructorDescriptor>,
    properties: Vec<PropertyDescriptor>,
}

impl HandlerFactory {
    /// Chooses the greedy constructor of `descriptor`.
    pub fn build(descriptor: &HandlerDescriptor) -> Self {
        let constructor = descriptor
            .constructors()
            .iter()
            .fold(None::<&ConstructorDescriptor>, |best, candidate| match best {
                Some(best) if best.arity() >= candidate.arity() => Some(best),
                _ => Some(candidate),
            })
            .cloned();

        Self {
            type_name: descriptor.type_name(),
            constructor,
            properties: descriptor.properties().to_vec(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The chosen constructor, if the type has any.
    pub fn constructor(&self) -> Option<&ConstructorDescriptor> {
        self.constructor.as_ref()
    }

    /// Builds an instance.
    ///
    /// Returns `Ok(None)` when the type has no constructor. Resolution
    /// errors are returned unchanged.
    pub fn create(
        &self,
        resolver: &dyn DependencyResolver,
        inject_properties: bool,
    ) -> ResolveResult<Option<Box<dyn Any + Send + Sync>>> {
        let Some(constructor) = &self.constructor else {
            return Ok(None);
        };

        let mut built = constructor.build(resolver)?;
        if inject_properties {
            for property in &self.properties {
                property.inject(built.as_mut(), resolver)?;
            }
        }
        Ok(Some(built))
    }
}

impl fmt::Debug for HandlerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFactory")
            .field("type_name", &self.type_name)
            .field("arity", &self.constructor.as_ref().map(|c| c.arity()))
            .field("properties", &self.properties.len())
            .finish()
    }
}

// ============================================================================
// ConstructionCache
// ============================================================================

/// Memoized [`HandlerFactory`] per type.
///
/// Concurrent first uses may each compute a factory; the first one stored
/// wins and every caller receives it.
#[derive(Default)]
pub struct ConstructionCache {
    factories: DashMap<TypeId, Arc<HandlerFactory>>,
}

impl ConstructionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached factory for `descriptor`, computing it on first use.
    pub fn get_or_build(&self, descriptor: &HandlerDescriptor) -> Arc<HandlerFactory> {
        if let Some(factory) = self.factories.get(&descriptor.type_id()) {
            return factory.value().clone();
        }

        let factory = Arc::new(HandlerFactory::build(descriptor));
        trace!(handler = descriptor.type_name(), "Built handler factory");
        self.factories
            .entry(descriptor.type_id())
            .or_insert(factory)
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn clear(&self) {
        self.factories.clear();
    }
}

impl fmt::Debug for ConstructionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructionCache")
            .field("factories", &self.factories.len())
            .finish()
    }
}

// ============================================================================
// ConstructorResolver
// ============================================================================

/// A resolver that falls back to building catalog types itself.
///
/// Requests go to the wrapped resolver first. Types it does not know but
/// the catalog does are built with the greedy constructor, their own
/// dependencies resolved the same way, up to [`MAX_DEPTH`] levels deep.
#[derive(Clone)]
pub struct ConstructorResolver {
    inner: Arc<dyn DependencyResolver>,
    catalog: Arc<HandlerCatalog>,
    cache: Arc<ConstructionCache>,
    inject_properties: bool,
    depth: usize,
}

impl ConstructorResolver {
    pub fn new(
        inner: Arc<dyn DependencyResolver>,
        catalog: Arc<HandlerCatalog>,
        cache: Arc<ConstructionCache>,
    ) -> Self {
        Self {
            inner,
            catalog,
            cache,
            inject_properties: false,
            depth: 0,
        }
    }

    /// Also fills unset properties of the components it builds.
    pub fn inject_properties(mut self, enabled: bool) -> Self {
        self.inject_properties = enabled;
        self
    }

    fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }
}

impl DependencyResolver for ConstructorResolver {
    fn resolve(&self, key: ServiceKey) -> ResolveResult<Option<Instance>> {
        if let Some(found) = self.inner.resolve(key)? {
            return Ok(Some(found));
        }
        let Some(descriptor) = self.catalog.get(key.type_id()) else {
            return Ok(None);
        };
        if self.depth >= MAX_DEPTH {
            return Err(ResolveError::DepthExceeded {
                type_name: key.type_name(),
                depth: MAX_DEPTH,
            });
        }

        let factory = self.cache.get_or_build(descriptor);
        let Some(built) = factory.create(&self.nested(), self.inject_properties)? else {
            return Ok(None);
        };
        trace!(component = key.type_name(), depth = self.depth, "Built component");
        Ok(descriptor.into_instance(built))
    }
}

impl fmt::Debug for ConstructorResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorResolver")
            .field("depth", &self.depth)
            .field("inject_properties", &self.inject_properties)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// HandlerResolver
// ============================================================================

/// The handler instance built for the message in flight.
#[derive(Clone)]
pub struct ResolvedHandler {
    /// The instance; its concrete type is the handler type.
    pub instance: HandlerInstance,
    pub type_id: TypeId,
    pub type_name: &'static str,
    /// Resolver the handler was built with, reused for method arguments.
    pub resolver: Arc<dyn DependencyResolver>,
}

impl ResolvedHandler {
    /// Borrows the instance as `H`.
    pub fn downcast_ref<H: 'static>(&self) -> Option<&H> {
        self.instance.downcast_ref::<H>()
    }
}

impl fmt::Debug for ResolvedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedHandler")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Middleware that builds the located handler.
///
/// Reads the [`LocatedHandler`] left by the locator and stores a
/// [`ResolvedHandler`]. When the handler type is the content type itself,
/// the payload is used as the instance. The post-action releases the
/// instance from the context.
pub struct HandlerResolver {
    catalog: Arc<HandlerCatalog>,
    cache: Arc<ConstructionCache>,
    inject_properties: bool,
    use_internal_resolver: bool,
}

impl HandlerResolver {
    /// Middleware id.
    pub const ID: &'static str = "handler-resolver";

    /// Creates a resolver with its own cache.
    pub fn new(catalog: Arc<HandlerCatalog>) -> Self {
        Self::with_cache(catalog, Arc::new(ConstructionCache::new()))
    }

    /// Creates a resolver sharing `cache`.
    pub fn with_cache(catalog: Arc<HandlerCatalog>, cache: Arc<ConstructionCache>) -> Self {
        Self {
            catalog,
            cache,
            inject_properties: false,
            use_internal_resolver: false,
        }
    }

    /// Fills unset registered properties after construction.
    pub fn inject_properties(mut self, enabled: bool) -> Self {
        self.inject_properties = enabled;
        self
    }

    /// Builds unregistered catalog components instead of failing on them.
    pub fn use_internal_resolver(mut self, enabled: bool) -> Self {
        self.use_internal_resolver = enabled;
        self
    }

    pub fn cache(&self) -> &Arc<ConstructionCache> {
        &self.cache
    }

    /// Builds the handler located for `ctx`.
    pub fn resolve_handler(&self, ctx: &MessageContext) -> PipelineResult<ResolvedHandler> {
        let located = ctx.get_item::<LocatedHandler>().ok_or_else(|| {
            ConfigurationError::HandlerNotFound {
                content_type: ctx.content_type().to_string(),
            }
        })?;

        let resolver: Arc<dyn DependencyResolver> = if self.use_internal_resolver {
            Arc::new(
                ConstructorResolver::new(ctx.resolver().clone(), self.catalog.clone(), self.cache.clone())
                    .inject_properties(self.inject_properties),
            )
        } else {
            ctx.resolver().clone()
        };

        if located.type_id == ctx.content().type_id() {
            trace!(handler = located.type_name, "Message handles itself");
            return Ok(ResolvedHandler {
                instance: ctx.content().as_any_arc(),
                type_id: located.type_id,
                type_name: located.type_name,
                resolver,
            });
        }

        let descriptor = self.catalog.get(located.type_id).ok_or_else(|| {
            ConfigurationError::HandlerNotFound {
                content_type: ctx.content_type().to_string(),
            }
        })?;
        let factory = self.cache.get_or_build(descriptor);
        let built = factory
            .create(resolver.as_ref(), self.inject_properties)?
            .ok_or(ConfigurationError::HandlerNotConstructed {
                handler: descriptor.type_name(),
            })?;

        Ok(ResolvedHandler {
            instance: Arc::from(built),
            type_id: located.type_id,
            type_name: located.type_name,
            resolver,
        })
    }
}

impl Middleware for HandlerResolver {
    fn id(&self) -> &str {
        Self::ID
    }

    fn handle(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        let resolved = self.resolve_handler(ctx)?;
        debug!(handler = resolved.type_name, "Resolved handler");
        ctx.set_item(resolved);
        Ok(())
    }

    fn has_post_action(&self) -> bool {
        true
    }

    fn post_handle(&self, ctx: &mut MessageContext) -> PipelineResult<()> {
        ctx.take_item::<ResolvedHandler>();
        Ok(())
    }

    fn dispose(&self) {
        self.cache.clear();
    }
}

impl fmt::Debug for HandlerResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerResolver")
            .field("cache", &self.cache)
            .field("inject_properties", &self.inject_properties)
            .field("use_internal_resolver", &self.use_internal_resolver)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::Dep;
    use missive_core::{Message, NullResolver, ResolverExt, ServiceRegistry};

    struct Audit(&'static str);

    struct Store {
        audit: Option<Arc<Audit>>,
        tag: &'static str,
    }

    impl Store {
        fn empty() -> Self {
            Self { audit: None, tag: "empty" }
        }

        fn with_name(name: Arc<String>) -> Self {
            let _ = name;
            Self { audit: None, tag: "named" }
        }

        fn with_audit(audit: Arc<Audit>) -> Self {
            Self {
                audit: Some(audit),
                tag: "audited",
            }
        }
    }

    struct Accounts {
        store: Arc<Store>,
    }

    struct Looping;

    impl Looping {
        fn new(_next: Dep<Looping>) -> Self {
            Looping
        }
    }

    fn store_descriptor() -> HandlerCatalog {
        let mut catalog = HandlerCatalog::new();
        catalog
            .register::<Store>()
            .constructor(Store::empty)
            .constructor(Store::with_name)
            .constructor(Store::with_audit)
            .property(|s: &mut Store| &mut s.audit);
        catalog
    }

    #[test]
    fn test_greedy_constructor_ties_to_first() {
        let catalog = store_descriptor();
        let factory = HandlerFactory::build(catalog.get(TypeId::of::<Store>()).unwrap());
        assert_eq!(factory.constructor().unwrap().arity(), 1);

        let services = ServiceRegistry::new();
        services.singleton(String::from("main"));
        let built = factory.create(&services, false).unwrap().unwrap();
        assert_eq!(built.downcast_ref::<Store>().unwrap().tag, "named");
    }

    #[test]
    fn test_no_constructor_yields_none() {
        let mut catalog = HandlerCatalog::new();
        catalog.register::<Audit>();
        let factory = HandlerFactory::build(catalog.get(TypeId::of::<Audit>()).unwrap());
        assert!(factory.create(&NullResolver, true).unwrap().is_none());
    }

    #[test]
    fn test_property_injection() {
        let catalog = store_descriptor();
        let factory = HandlerFactory::build(catalog.get(TypeId::of::<Store>()).unwrap());
        let services = ServiceRegistry::new();
        services.singleton(String::from("main")).singleton(Audit("shared"));

        let plain = factory.create(&services, false).unwrap().unwrap();
        assert!(plain.downcast_ref::<Store>().unwrap().audit.is_none());

        let injected = factory.create(&services, true).unwrap().unwrap();
        let audit = injected.downcast_ref::<Store>().unwrap().audit.clone();
        assert_eq!(audit.unwrap().0, "shared");
    }

    #[test]
    fn test_cache_converges() {
        let catalog = store_descriptor();
        let descriptor = catalog.get(TypeId::of::<Store>()).unwrap();
        let cache = ConstructionCache::new();

        let first = cache.get_or_build(descriptor);
        let second = cache.get_or_build(descriptor);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_constructor_resolver_builds_components() {
        let mut catalog = store_descriptor();
        catalog
            .register::<Accounts>()
            .constructor(|store: Arc<Store>| Accounts { store });
        let catalog = Arc::new(catalog);

        let services = Arc::new(ServiceRegistry::new());
        services
            .singleton(String::from("main"))
            .singleton(Audit("outer"));
        let resolver = ConstructorResolver::new(services, catalog, Arc::new(ConstructionCache::new()))
            .inject_properties(true);

        let accounts = resolver.require::<Accounts>().unwrap();
        assert_eq!(accounts.store.tag, "named");
        assert_eq!(accounts.store.audit.as_ref().unwrap().0, "outer");
        assert!(resolver.get::<u64>().unwrap().is_none());
    }

    #[test]
    fn test_constructor_resolver_depth_limit() {
        let mut catalog = HandlerCatalog::new();
        catalog.register::<Looping>().constructor(Looping::new);
        let resolver = ConstructorResolver::new(
            Arc::new(NullResolver),
            Arc::new(catalog),
            Arc::new(ConstructionCache::new()),
        );

        assert!(matches!(
            resolver.require::<Looping>(),
            Err(ResolveError::DepthExceeded { depth: MAX_DEPTH, .. })
        ));
    }

    #[test]
    fn test_missing_location_is_configuration_error() {
        let resolver = HandlerResolver::new(Arc::new(HandlerCatalog::new()));
        let ctx = MessageContext::new(Message::command(1_u32));
        assert!(resolver.resolve_handler(&ctx).unwrap_err().is_configuration());
    }
}
