//! Argument injection for handler constructors and methods.
//!
//! Every constructor and method parameter implements [`Inject`]. A parameter
//! is filled according to its [`Binding`]: from the message payload, from the
//! dependency resolver, or with the caller's cancellation token.
//!
//! | Parameter type | Payload | Resolver | Token |
//! |---|---|---|---|
//! | `Arc<T>` | downcast of the payload | `T` required | - |
//! | `Option<Arc<T>>` | downcast of the payload | `T` if registered | - |
//! | `Dep<T>` (`T: ?Sized`) | - | `T` required | - |
//! | `CancellationToken` | - | registered token | caller's token |

use std::any::type_name;
use std::ops::Deref;
use std::sync::Arc;

use missive_core::{
    ConfigurationError, DependencyResolver, Payload, PipelineResult, ResolveResult, ResolverExt,
};
use tokio_util::sync::CancellationToken;

/// Where a parameter receives its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    /// The message payload.
    Payload,
    /// The dependency resolver, keyed by the parameter type.
    Resolve,
    /// The caller's cancellation token.
    Token,
}

/// Static description of an injectable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamInfo {
    /// Declared parameter type.
    pub type_name: &'static str,
    /// Whether the parameter is a cancellation token.
    pub is_token: bool,
}

impl ParamInfo {
    /// Describes the parameter type `T`.
    pub fn of<T: Inject>() -> Self {
        Self {
            type_name: type_name::<T>(),
            is_token: T::IS_TOKEN,
        }
    }
}

/// A value that can be injected as a constructor or method argument.
pub trait Inject: Sized + Send + 'static {
    /// `true` only for cancellation tokens.
    const IS_TOKEN: bool = false;

    /// Produces the value from the dependency resolver.
    fn from_resolver(resolver: &dyn DependencyResolver) -> ResolveResult<Self>;

    /// Produces the value from the message payload, if the type allows it.
    fn from_payload(payload: &Payload) -> Option<Self> {
        let _ = payload;
        None
    }

    /// Produces the value from the caller's cancellation token.
    fn from_token(token: &CancellationToken) -> Option<Self> {
        let _ = token;
        None
    }
}

impl<T: Send + Sync + 'static> Inject for Arc<T> {
    fn from_resolver(resolver: &dyn DependencyResolver) -> ResolveResult<Self> {
        resolver.require::<T>()
    }

    fn from_payload(payload: &Payload) -> Option<Self> {
        payload.downcast_arc::<T>()
    }
}

impl<T: Send + Sync + 'static> Inject for Option<Arc<T>> {
    fn from_resolver(resolver: &dyn DependencyResolver) -> ResolveResult<Self> {
        resolver.get::<T>()
    }

    fn from_payload(payload: &Payload) -> Option<Self> {
        payload.downcast_arc::<T>().map(Some)
    }
}

impl Inject for CancellationToken {
    const IS_TOKEN: bool = true;

    fn from_resolver(resolver: &dyn DependencyResolver) -> ResolveResult<Self> {
        resolver.require::<CancellationToken>().map(|t| (*t).clone())
    }

    fn from_token(token: &CancellationToken) -> Option<Self> {
        Some(token.clone())
    }
}

// ============================================================================
// Dep<T>
// ============================================================================

/// A resolved dependency that may be a trait object.
///
/// `Arc<T>` parameters require a sized `T` because they can also receive the
/// payload. `Dep<dyn Trait>` is always resolved.
///
/// # Example
///
/// ```rust,ignore
/// fn new(clock: Dep<dyn Clock + Send + Sync>) -> AccountHandlers {
///     AccountHandlers { clock: clock.into_inner() }
/// }
/// ```
pub struct Dep<T: ?Sized>(pub Arc<T>);

impl<T: ?Sized> Dep<T> {
    /// Returns the shared dependency.
    pub fn into_inner(self) -> Arc<T> {
        self.0
    }
}

impl<T: ?Sized> Deref for Dep<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> Clone for Dep<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: ?Sized + Send + Sync + 'static> Inject for Dep<T> {
    fn from_resolver(resolver: &dyn DependencyResolver) -> ResolveResult<Self> {
        resolver.require::<T>().map(Dep)
    }
}

// ============================================================================
// Binding rules
// ============================================================================

/// Computes the bindings of a method's parameters.
///
/// - No parameters: nothing is bound.
/// - A trailing cancellation token receives the caller's token, also when it
///   is the only parameter.
/// - A single other parameter receives the payload.
/// - With several parameters, the first receives the payload unless the
///   handler is the payload type itself (`self_handling`), in which case it
///   is resolved like all the others.
pub fn method_bindings(params: &[ParamInfo], self_handling: bool) -> Vec<Binding> {
    let count = params.len();
    params
        .iter()
        .enumerate()
        .map(|(index, param)| {
            if index + 1 == count && param.is_token {
                Binding::Token
            } else if count == 1 {
                Binding::Payload
            } else if index == 0 && !self_handling {
                Binding::Payload
            } else {
                Binding::Resolve
            }
        })
        .collect()
}

/// Constructor parameters are always resolved.
pub fn constructor_bindings(params: &[ParamInfo]) -> Vec<Binding> {
    vec![Binding::Resolve; params.len()]
}

// ============================================================================
// Arguments
// ============================================================================

/// Sources for the arguments of one call.
#[derive(Clone, Copy)]
pub struct Arguments<'a> {
    bindings: &'a [Binding],
    payload: &'a Payload,
    resolver: &'a dyn DependencyResolver,
    token: &'a CancellationToken,
}

impl<'a> Arguments<'a> {
    pub fn new(
        bindings: &'a [Binding],
        payload: &'a Payload,
        resolver: &'a dyn DependencyResolver,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            bindings,
            payload,
            resolver,
            token,
        }
    }

    pub fn bindings(&self) -> &'a [Binding] {
        self.bindings
    }

    /// Produces the argument for a parameter of type `T`.
    ///
    /// `binding` is `None` when the parameter has no binding at all, which
    /// only happens if the bindings were computed for another signature.
    pub fn bind<T: Inject>(&self, binding: Option<Binding>) -> PipelineResult<T> {
        match binding {
            Some(Binding::Payload) => T::from_payload(self.payload).ok_or_else(|| {
                ConfigurationError::PayloadMismatch {
                    expected: type_name::<T>(),
                    actual: self.payload.type_name(),
                }
                .into()
            }),
            Some(Binding::Resolve) => Ok(T::from_resolver(self.resolver)?),
            Some(Binding::Token) => T::from_token(self.token).ok_or_else(|| unbound::<T>()),
            None => Err(unbound::<T>()),
        }
    }
}

fn unbound<T>() -> missive_core::PipelineError {
    ConfigurationError::UnboundParameter {
        parameter: type_name::<T>(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_core::{PipelineError, ServiceRegistry};

    const PAYLOAD: ParamInfo = ParamInfo {
        type_name: "Arc<Deposit>",
        is_token: false,
    };
    const SERVICE: ParamInfo = ParamInfo {
        type_name: "Arc<Ledger>",
        is_token: false,
    };
    const TOKEN: ParamInfo = ParamInfo {
        type_name: "CancellationToken",
        is_token: true,
    };

    #[derive(Debug)]
    struct Deposit(u64);

    #[test]
    fn test_zero_params() {
        assert!(method_bindings(&[], false).is_empty());
        assert!(method_bindings(&[], true).is_empty());
    }

    #[test]
    fn test_single_param_is_payload() {
        assert_eq!(method_bindings(&[PAYLOAD], false), [Binding::Payload]);
        assert_eq!(method_bindings(&[PAYLOAD], true), [Binding::Payload]);
    }

    #[test]
    fn test_trailing_token() {
        assert_eq!(method_bindings(&[TOKEN], false), [Binding::Token]);
        assert_eq!(
            method_bindings(&[PAYLOAD, TOKEN], false),
            [Binding::Payload, Binding::Token]
        );
        assert_eq!(
            method_bindings(&[SERVICE, TOKEN], true),
            [Binding::Resolve, Binding::Token]
        );
    }

    #[test]
    fn test_first_param_heuristic() {
        assert_eq!(
            method_bindings(&[PAYLOAD, SERVICE, SERVICE], false),
            [Binding::Payload, Binding::Resolve, Binding::Resolve]
        );
        assert_eq!(
            method_bindings(&[SERVICE, SERVICE], true),
            [Binding::Resolve, Binding::Resolve]
        );
    }

    #[test]
    fn test_token_not_trailing_is_resolved() {
        assert_eq!(
            method_bindings(&[PAYLOAD, TOKEN, SERVICE], false),
            [Binding::Payload, Binding::Resolve, Binding::Resolve]
        );
    }

    #[test]
    fn test_bind_sources() {
        let services = ServiceRegistry::new();
        services.singleton(String::from("ledger"));
        let payload = Payload::opaque(Deposit(5));
        let token = CancellationToken::new();
        let bindings = [Binding::Payload, Binding::Resolve, Binding::Token];
        let args = Arguments::new(&bindings, &payload, &services, &token);

        let deposit: Arc<Deposit> = args.bind(Some(Binding::Payload)).unwrap();
        assert_eq!(deposit.0, 5);
        let name: Arc<String> = args.bind(Some(Binding::Resolve)).unwrap();
        assert_eq!(name.as_str(), "ledger");
        let missing: Option<Arc<u32>> = args.bind(Some(Binding::Resolve)).unwrap();
        assert!(missing.is_none());
        let bound: CancellationToken = args.bind(Some(Binding::Token)).unwrap();
        token.cancel();
        assert!(bound.is_cancelled());
    }

    #[test]
    fn test_bind_errors() {
        let services = ServiceRegistry::new();
        let payload = Payload::opaque(Deposit(5));
        let token = CancellationToken::new();
        let args = Arguments::new(&[], &payload, &services, &token);

        assert!(matches!(
            args.bind::<Arc<String>>(Some(Binding::Payload)),
            Err(PipelineError::Configuration(
                ConfigurationError::PayloadMismatch { .. }
            ))
        ));
        assert!(matches!(
            args.bind::<Arc<String>>(Some(Binding::Resolve)),
            Err(PipelineError::Resolve(_))
        ));
        assert!(matches!(
            args.bind::<Arc<String>>(Some(Binding::Token)),
            Err(PipelineError::Configuration(
                ConfigurationError::UnboundParameter { .. }
            ))
        ));
    }
}
