//! Dependency resolution boundary.
//!
//! The dispatch engine never inspects how dependencies are produced. It asks a
//! [`DependencyResolver`] for an instance of a type identified by a
//! [`ServiceKey`] and either receives one or learns that none is registered.
//!
//! Instances travel type-erased as [`Instance`]: an `Arc<dyn Any>` whose
//! concrete value is an `Arc<T>`. Storing `Arc<T>` rather than `T` lets
//! resolvers hand out trait objects (`Arc<dyn Clock + Send + Sync>`) as
//! easily as concrete services.
//!
//! # Example
//!
//! ```rust,ignore
//! let services = ServiceRegistry::new();
//! services.singleton(SystemClock);
//! services.factory(|r| Ok(Arc::new(Ledger::new(r.require::<SystemClock>()?))));
//!
//! let ledger: Arc<Ledger> = services.require::<Ledger>()?;
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::foundation::error::{ResolveError, ResolveResult};

/// A type-erased resolved instance holding an `Arc<T>`.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Wraps a shared value as an [`Instance`].
pub fn instance<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Instance {
    Arc::new(value)
}

// ============================================================================
// ServiceKey
// ============================================================================

/// Identifies a requested dependency by type.
#[derive(Clone, Copy)]
pub struct ServiceKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl ServiceKey {
    /// Returns the key for `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Returns the [`TypeId`] of the requested type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the name of the requested type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceKey").field(&self.type_name).finish()
    }
}

// ============================================================================
// DependencyResolver
// ============================================================================

/// Produces instances for requested types.
///
/// `Ok(None)` signals that the type is not registered. Errors are reserved for
/// registrations that exist but could not produce a value; the engine
/// propagates them unchanged.
pub trait DependencyResolver: Send + Sync {
    /// Resolves an instance for `key`.
    fn resolve(&self, key: ServiceKey) -> ResolveResult<Option<Instance>>;
}

impl<R: DependencyResolver + ?Sized> DependencyResolver for Arc<R> {
    fn resolve(&self, key: ServiceKey) -> ResolveResult<Option<Instance>> {
        (**self).resolve(key)
    }
}

/// Typed helpers over any [`DependencyResolver`].
pub trait ResolverExt {
    /// Resolves `T`, returning `None` if it is not registered.
    fn get<T: ?Sized + Send + Sync + 'static>(&self) -> ResolveResult<Option<Arc<T>>>;

    /// Resolves `T`, failing with [`ResolveError::Missing`] if it is not
    /// registered.
    fn require<T: ?Sized + Send + Sync + 'static>(&self) -> ResolveResult<Arc<T>> {
        self.get::<T>()?.ok_or_else(ResolveError::missing::<T>)
    }
}

impl<R: DependencyResolver + ?Sized> ResolverExt for R {
    fn get<T: ?Sized + Send + Sync + 'static>(&self) -> ResolveResult<Option<Arc<T>>> {
        let Some(instance) = self.resolve(ServiceKey::of::<T>())? else {
            return Ok(None);
        };
        instance
            .downcast_ref::<Arc<T>>()
            .cloned()
            .map(Some)
            .ok_or(ResolveError::TypeMismatch {
                type_name: type_name::<T>(),
            })
    }
}

/// A resolver with no registrations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullResolver;

impl DependencyResolver for NullResolver {
    fn resolve(&self, _key: ServiceKey) -> ResolveResult<Option<Instance>> {
        Ok(None)
    }
}

// ============================================================================
// ServiceRegistry
// ============================================================================

type FactoryFn = dyn Fn(&dyn DependencyResolver) -> ResolveResult<Instance> + Send + Sync;

#[derive(Clone)]
enum Registration {
    Singleton(Instance),
    Factory(Arc<FactoryFn>),
}

/// A host-side service locator with singleton and factory registrations.
///
/// Factories receive the registry itself, so they can resolve their own
/// dependencies. A factory runs on every resolution.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: RwLock<HashMap<TypeId, Registration>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shared instance of `T`.
    pub fn singleton<T: Send + Sync + 'static>(&self, value: T) -> &Self {
        self.singleton_arc(Arc::new(value))
    }

    /// Registers an already shared instance, which may be a trait object.
    pub fn singleton_arc<T: ?Sized + Send + Sync + 'static>(&self, value: Arc<T>) -> &Self {
        self.entries
            .write()
            .insert(TypeId::of::<T>(), Registration::Singleton(instance(value)));
        self
    }

    /// Registers a factory producing a fresh `T` per resolution.
    pub fn factory<T, F>(&self, factory: F) -> &Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&dyn DependencyResolver) -> ResolveResult<Arc<T>> + Send + Sync + 'static,
    {
        let erased: Arc<FactoryFn> =
            Arc::new(move |resolver: &dyn DependencyResolver| factory(resolver).map(instance::<T>));
        self.entries
            .write()
            .insert(TypeId::of::<T>(), Registration::Factory(erased));
        self
    }

    /// Returns `true` if `T` is registered.
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.entries.read().contains_key(&TypeId::of::<T>())
    }

    /// Removes the registration for `T`.
    pub fn remove<T: ?Sized + 'static>(&self) -> bool {
        self.entries.write().remove(&TypeId::of::<T>()).is_some()
    }

    /// Returns the number of registrations.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DependencyResolver for ServiceRegistry {
    fn resolve(&self, key: ServiceKey) -> ResolveResult<Option<Instance>> {
        // Clone out of the lock: factories may resolve recursively.
        let registration = self.entries.read().get(&key.type_id()).cloned();
        match registration {
            None => Ok(None),
            Some(Registration::Singleton(instance)) => Ok(Some(instance)),
            Some(Registration::Factory(factory)) => factory(self).map(Some),
        }
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("registrations", &self.len())
            .finish()
    }
}
