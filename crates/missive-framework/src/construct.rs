//! Handler constructors.
//!
//! A constructor is any function whose parameters all implement [`Inject`]
//! and which returns the handler. Every parameter is resolved by type through
//! the dependency resolver.
//!
//! ```rust,ignore
//! impl AccountHandlers {
//!     fn new(store: Arc<AccountStore>, clock: Dep<dyn Clock + Send + Sync>) -> Self {
//!         Self { store, clock: clock.into_inner() }
//!     }
//! }
//!
//! catalog.register::<AccountHandlers>().constructor(AccountHandlers::new);
//! ```

use missive_core::{DependencyResolver, ResolveResult};

use crate::inject::{Inject, ParamInfo};

/// A function that builds `H` from resolved dependencies.
///
/// `Args` is a marker holding the parameter types.
pub trait Constructor<H, Args>: Send + Sync + 'static {
    /// Describes the parameters, in order.
    fn params() -> Vec<ParamInfo>;

    /// Resolves every parameter and calls the function.
    fn construct(&self, resolver: &dyn DependencyResolver) -> ResolveResult<H>;
}

/// Macro to generate constructor implementations for functions with different arities.
macro_rules! impl_constructor {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_variables)]
        impl<F, H, $($ty,)*> Constructor<H, ($($ty,)*)> for F
        where
            F: Fn($($ty,)*) -> H + Send + Sync + 'static,
            $( $ty: Inject, )*
        {
            fn params() -> Vec<ParamInfo> {
                vec![$( ParamInfo::of::<$ty>(), )*]
            }

            fn construct(&self, resolver: &dyn DependencyResolver) -> ResolveResult<H> {
                $(
                    let $ty = $ty::from_resolver(resolver)?;
                )*

                Ok((self)($($ty,)*))
            }
        }
    };
}

// Generate implementations for 0-12 parameters
impl_constructor!();
impl_constructor!(T1);
impl_constructor!(T1, T2);
impl_constructor!(T1, T2, T3);
impl_constructor!(T1, T2, T3, T4);
impl_constructor!(T1, T2, T3, T4, T5);
impl_constructor!(T1, T2, T3, T4, T5, T6);
impl_constructor!(T1, T2, T3, T4, T5, T6, T7);
impl_constructor!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_constructor!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_constructor!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_constructor!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_constructor!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::Dep;
    use missive_core::{NullResolver, ResolveError, ServiceRegistry};
    use std::sync::Arc;

    trait Clock: Send + Sync {
        fn now(&self) -> u64;
    }

    struct Fixed;

    impl Clock for Fixed {
        fn now(&self) -> u64 {
            99
        }
    }

    struct Stamp {
        prefix: Arc<String>,
        at: u64,
    }

    impl Stamp {
        fn new(prefix: Arc<String>, clock: Dep<dyn Clock>) -> Self {
            Self {
                prefix,
                at: clock.now(),
            }
        }
    }

    fn build<Args, C: Constructor<Stamp, Args>>(
        constructor: C,
        resolver: &dyn DependencyResolver,
    ) -> ResolveResult<Stamp> {
        assert_eq!(C::params().len(), 2);
        constructor.construct(resolver)
    }

    #[test]
    fn test_resolves_every_parameter() {
        let services = ServiceRegistry::new();
        services
            .singleton(String::from("tx"))
            .singleton_arc::<dyn Clock>(Arc::new(Fixed));

        let stamp = build(Stamp::new, &services).unwrap();
        assert_eq!(stamp.prefix.as_str(), "tx");
        assert_eq!(stamp.at, 99);
    }

    #[test]
    fn test_missing_dependency_propagates() {
        let err = build(Stamp::new, &NullResolver).err();
        assert_eq!(err, Some(ResolveError::missing::<String>()));
    }
}
