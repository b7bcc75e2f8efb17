//! Handler catalog.
//!
//! A [`HandlerCatalog`] is the registration table the dispatch middlewares
//! consult instead of scanning types at runtime. Each entry describes one
//! type: its constructors, the messages it handles and how, its optional
//! injectable properties, and the message kinds it is marked for.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut catalog = HandlerCatalog::new();
//! catalog
//!     .register::<AccountHandlers>()
//!     .marker(MessageKind::Command)
//!     .constructor(AccountHandlers::new)
//!     .handles::<OpenAccount, _, _>(AccountHandlers::open)
//!     .handles_async::<Deposit, _, _>(AccountHandlers::deposit)
//!     .property(|h: &mut AccountHandlers| &mut h.audit);
//! ```
//!
//! Crates may also contribute registrations at link time:
//!
//! ```rust,ignore
//! use missive_framework::{HANDLER_MODULES, HandlerCatalog, linkme::distributed_slice};
//!
//! #[distributed_slice(HANDLER_MODULES)]
//! #[linkme(crate = missive_framework::linkme)]
//! static ACCOUNTS: fn(&mut HandlerCatalog) = register_accounts;
//!
//! let catalog = HandlerCatalog::collect_all();
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use linkme::distributed_slice;
use missive_core::{
    ConfigurationError, DependencyResolver, Instance, MessageKind, PipelineResult, ResolveResult,
    ResolverExt, simple_type_name,
};
use tracing::{debug, warn};

use crate::construct::Constructor;
use crate::inject::{Arguments, ParamInfo};
use crate::method::{AsyncMethod, Invocation, SyncMethod};

/// A handler instance held as `Arc<dyn Any>` whose concrete type is the
/// handler type itself.
pub type HandlerInstance = Arc<dyn Any + Send + Sync>;

type BuildFn = dyn Fn(&dyn DependencyResolver) -> ResolveResult<Box<dyn Any + Send + Sync>> + Send + Sync;
type InjectFn = dyn Fn(&mut (dyn Any + Send + Sync), &dyn DependencyResolver) -> ResolveResult<()> + Send + Sync;
pub(crate) type CallFn = dyn Fn(HandlerInstance, &Arguments<'_>) -> PipelineResult<Invocation> + Send + Sync;

// ============================================================================
// Link-time registrations
// ============================================================================

/// Registration functions contributed by linked crates.
///
/// [`HandlerCatalog::collect_all`] runs every entry.
#[distributed_slice]
pub static HANDLER_MODULES: [fn(&mut HandlerCatalog)];

// ============================================================================
// Descriptors
// ============================================================================

/// A registered constructor.
#[derive(Clone)]
pub struct ConstructorDescriptor {
    params: Vec<ParamInfo>,
    build: Arc<BuildFn>,
}

impl ConstructorDescriptor {
    /// Parameters of the constructor.
    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }

    /// Number of parameters.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub(crate) fn build(
        &self,
        resolver: &dyn DependencyResolver,
    ) -> ResolveResult<Box<dyn Any + Send + Sync>> {
        (self.build)(resolver)
    }
}

/// A registered optional property.
#[derive(Clone)]
pub struct PropertyDescriptor {
    type_name: &'static str,
    inject: Arc<InjectFn>,
}

impl PropertyDescriptor {
    /// Type of the injected value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Fills the property from `resolver` if it is still unset.
    pub(crate) fn inject(
        &self,
        target: &mut (dyn Any + Send + Sync),
        resolver: &dyn DependencyResolver,
    ) -> ResolveResult<()> {
        (self.inject)(target, resolver)
    }
}

/// A registered handler method.
#[derive(Clone)]
pub struct MethodDescriptor {
    message: TypeId,
    message_name: &'static str,
    params: Vec<ParamInfo>,
    asynchronous: bool,
    call: Arc<CallFn>,
}

impl MethodDescriptor {
    /// `TypeId` of the handled message.
    pub fn message(&self) -> TypeId {
        self.message
    }

    /// Type name of the handled message.
    pub fn message_name(&self) -> &'static str {
        self.message_name
    }

    /// Parameters of the method, excluding the handler itself.
    pub fn params(&self) -> &[ParamInfo] {
        &self.params
    }

    /// Whether the method returns a future.
    pub fn is_async(&self) -> bool {
        self.asynchronous
    }

    pub(crate) fn call(&self) -> Arc<CallFn> {
        self.call.clone()
    }
}

/// Everything registered for one type.
pub struct HandlerDescriptor {
    type_id: TypeId,
    type_name: &'static str,
    markers: Vec<MessageKind>,
    constructors: Vec<ConstructorDescriptor>,
    properties: Vec<PropertyDescriptor>,
    methods: Vec<MethodDescriptor>,
    into_instance: fn(Box<dyn Any + Send + Sync>) -> Option<Instance>,
}

impl HandlerDescriptor {
    fn new<H: Send + Sync + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<H>(),
            type_name: type_name::<H>(),
            markers: Vec::new(),
            constructors: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            into_instance: into_instance::<H>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type name without module path or generics.
    pub fn simple_name(&self) -> &'static str {
        simple_type_name(self.type_name)
    }

    /// Returns `true` if the type is marked as a handler for `kind`.
    pub fn is_marked(&self, kind: MessageKind) -> bool {
        self.markers.contains(&kind)
    }

    /// Constructors in registration order.
    pub fn constructors(&self) -> &[ConstructorDescriptor] {
        &self.constructors
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// Returns the method handling `message`, if any.
    pub fn method(&self, message: TypeId) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.message == message)
    }

    /// Wraps a value built by one of this type's constructors as a resolver
    /// [`Instance`].
    pub(crate) fn into_instance(&self, built: Box<dyn Any + Send + Sync>) -> Option<Instance> {
        (self.into_instance)(built)
    }
}

fn into_instance<H: Send + Sync + 'static>(built: Box<dyn Any + Send + Sync>) -> Option<Instance> {
    built
        .downcast::<H>()
        .ok()
        .map(|h| missive_core::instance(Arc::<H>::from(h)))
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("type_name", &self.type_name)
            .field("markers", &self.markers)
            .field("constructors", &self.constructors.len())
            .field("properties", &self.properties.len())
            .field(
                "methods",
                &self.methods.iter().map(|m| m.message_name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ============================================================================
// Registration builder
// ============================================================================

/// Builder returned by [`HandlerCatalog::register`].
pub struct HandlerRegistration<'a, H> {
    descriptor: &'a mut HandlerDescriptor,
    _handler: PhantomData<fn() -> H>,
}

impl<H: Send + Sync + 'static> HandlerRegistration<'_, H> {
    /// Marks the type as a handler for messages of `kind`.
    pub fn marker(self, kind: MessageKind) -> Self {
        if !self.descriptor.markers.contains(&kind) {
            self.descriptor.markers.push(kind);
        }
        self
    }

    /// Adds a constructor.
    ///
    /// When several are registered, the one with the most parameters is used;
    /// among equally long ones, the first registered wins.
    pub fn constructor<Args, C>(self, constructor: C) -> Self
    where
        C: Constructor<H, Args>,
    {
        let build = erase_build(move |resolver| {
            constructor
                .construct(resolver)
                .map(|h| Box::new(h) as Box<dyn Any + Send + Sync>)
        });
        self.descriptor.constructors.push(ConstructorDescriptor {
            params: C::params(),
            build,
        });
        self
    }

    /// Adds an optional property filled after construction when it is still
    /// `None` and property injection is enabled.
    pub fn property<T>(self, slot: fn(&mut H) -> &mut Option<Arc<T>>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let inject = erase_inject(move |target, resolver| {
            let Some(handler) = target.downcast_mut::<H>() else {
                return Ok(());
            };
            let field = slot(handler);
            if field.is_none() {
                *field = resolver.get::<T>()?;
            }
            Ok(())
        });
        self.descriptor.properties.push(PropertyDescriptor {
            type_name: type_name::<T>(),
            inject,
        });
        self
    }

    /// Declares a synchronous method handling messages of type `M`.
    pub fn handles<M: 'static, Args, F>(self, method: F) -> Self
    where
        F: SyncMethod<H, Args>,
    {
        let call = erase_call(move |instance, args| {
            let handler = instance
                .downcast_ref::<H>()
                .ok_or_else(instance_mismatch::<H, M>)?;
            Ok(Invocation::Ready(SyncMethod::call(&method, handler, args)?))
        });
        self.push_method::<M>(F::params(), false, call)
    }

    /// Declares an asynchronous method handling messages of type `M`.
    pub fn handles_async<M: 'static, Args, F>(self, method: F) -> Self
    where
        F: AsyncMethod<H, Args>,
    {
        let call = erase_call(move |instance, args| {
            let handler = instance
                .downcast::<H>()
                .map_err(|_| instance_mismatch::<H, M>())?;
            Ok(Invocation::Pending(AsyncMethod::call(&method, handler, args)?))
        });
        self.push_method::<M>(F::params(), true, call)
    }

    fn push_method<M: 'static>(self, params: Vec<ParamInfo>, asynchronous: bool, call: Arc<CallFn>) -> Self {
        let message = TypeId::of::<M>();
        if self.descriptor.method(message).is_some() {
            warn!(
                handler = self.descriptor.type_name,
                message = type_name::<M>(),
                "Handler declares more than one method for a message, using first"
            );
            return self;
        }
        self.descriptor.methods.push(MethodDescriptor {
            message,
            message_name: type_name::<M>(),
            params,
            asynchronous,
            call,
        });
        self
    }
}

fn erase_build<F>(build: F) -> Arc<BuildFn>
where
    F: Fn(&dyn DependencyResolver) -> ResolveResult<Box<dyn Any + Send + Sync>> + Send + Sync + 'static,
{
    Arc::new(build)
}

fn erase_inject<F>(inject: F) -> Arc<InjectFn>
where
    F: Fn(&mut (dyn Any + Send + Sync), &dyn DependencyResolver) -> ResolveResult<()>
        + Send
        + Sync
        + 'static,
{
    Arc::new(inject)
}

fn erase_call<F>(call: F) -> Arc<CallFn>
where
    F: Fn(HandlerInstance, &Arguments<'_>) -> PipelineResult<Invocation> + Send + Sync + 'static,
{
    Arc::new(call)
}

fn instance_mismatch<H, M>() -> missive_core::PipelineError {
    ConfigurationError::MethodNotFound {
        handler: type_name::<H>(),
        content_type: type_name::<M>().to_string(),
    }
    .into()
}

// ============================================================================
// HandlerCatalog
// ============================================================================

/// The registration table of handler and component types.
#[derive(Default)]
pub struct HandlerCatalog {
    descriptors: Vec<HandlerDescriptor>,
    index: HashMap<TypeId, usize>,
}

impl HandlerCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a catalog from every registration function in
    /// [`HANDLER_MODULES`].
    pub fn collect_all() -> Self {
        let mut catalog = Self::new();
        for register in HANDLER_MODULES {
            register(&mut catalog);
        }
        debug!(
            modules = HANDLER_MODULES.len(),
            types = catalog.len(),
            "Collected handler catalog"
        );
        catalog
    }

    /// Starts (or continues) the registration of `H`.
    pub fn register<H: Send + Sync + 'static>(&mut self) -> HandlerRegistration<'_, H> {
        let index = match self.index.get(&TypeId::of::<H>()) {
            Some(&index) => index,
            None => {
                self.descriptors.push(HandlerDescriptor::new::<H>());
                let index = self.descriptors.len() - 1;
                self.index.insert(TypeId::of::<H>(), index);
                index
            }
        };
        HandlerRegistration {
            descriptor: &mut self.descriptors[index],
            _handler: PhantomData,
        }
    }

    /// Registers a dependency that is built from the catalog when the host
    /// resolver does not know it.
    ///
    /// Components are registered exactly like handlers; the name only states
    /// the intent.
    pub fn register_component<T: Send + Sync + 'static>(&mut self) -> HandlerRegistration<'_, T> {
        self.register::<T>()
    }

    /// Moves every registration of `other` into this catalog.
    ///
    /// Types already registered here keep their existing descriptor.
    pub fn merge(&mut self, other: HandlerCatalog) {
        for descriptor in other.descriptors {
            if self.index.contains_key(&descriptor.type_id) {
                warn!(handler = descriptor.type_name, "Type registered twice, keeping first");
                continue;
            }
            self.index.insert(descriptor.type_id, self.descriptors.len());
            self.descriptors.push(descriptor);
        }
    }

    /// Looks up the descriptor of a type.
    pub fn get(&self, type_id: TypeId) -> Option<&HandlerDescriptor> {
        self.index.get(&type_id).map(|&i| &self.descriptors[i])
    }

    /// Returns `true` if the type is registered.
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.index.contains_key(&type_id)
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> &[HandlerDescriptor] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(&self.descriptors).finish()
    }
}
