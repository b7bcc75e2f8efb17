//! Handler methods.
//!
//! Methods are plain functions, implemented via blanket implementations for
//! functions with different arities, similar to Axum's handler system:
//!
//! - [`SyncMethod`]: `Fn(&H, T1, .., Tn) -> R`
//! - [`AsyncMethod`]: `Fn(Arc<H>, T1, .., Tn) -> impl Future<Output = R>`
//!
//! where every `Ti` implements [`Inject`] and `R` implements [`MethodOutput`].
//!
//! # Example
//!
//! ```rust,ignore
//! impl AccountHandlers {
//!     fn open(&self, cmd: Arc<OpenAccount>) -> Result<AccountId, LedgerError> {
//!         self.store.open(&cmd.owner)
//!     }
//!
//!     async fn statement(
//!         self: Arc<Self>,
//!         query: Arc<Statement>,
//!         token: CancellationToken,
//!     ) -> Reply<Vec<Entry>> {
//!         Reply(self.store.entries(&query.account, &token).await)
//!     }
//! }
//! ```

use std::any::{Any, type_name};
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use missive_core::{Failure, PipelineResult};

use crate::inject::{Arguments, Inject, ParamInfo};

// ============================================================================
// Outcomes
// ============================================================================

/// The value returned by a handler method.
///
/// Stored in the context item bag by the executor.
pub struct HandlerOutput {
    value: Box<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl HandlerOutput {
    /// Wraps a returned value.
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            value: Box::new(value),
            type_name: type_name::<T>(),
        }
    }

    /// Returns the type name of the value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Borrows the value as `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Takes the value as `T`, or gives the output back.
    pub fn downcast<T: 'static>(self) -> Result<T, Self> {
        match self.value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Self {
                value,
                type_name: self.type_name,
            }),
        }
    }
}

impl fmt::Debug for HandlerOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerOutput").field(&self.type_name).finish()
    }
}

/// Result of one handler call: an optional output, or a captured failure.
pub type Outcome = Result<Option<HandlerOutput>, Failure>;

/// A compiled call's result: either finished or still to be awaited.
pub enum Invocation {
    /// The method was synchronous.
    Ready(Outcome),
    /// The method was asynchronous.
    Pending(BoxFuture<'static, Outcome>),
}

impl Invocation {
    /// Blocks the current thread until the outcome is available.
    pub fn wait(self) -> Outcome {
        match self {
            Self::Ready(outcome) => outcome,
            Self::Pending(future) => futures::executor::block_on(future),
        }
    }

    /// Awaits the outcome.
    pub async fn resolve(self) -> Outcome {
        match self {
            Self::Ready(outcome) => outcome,
            Self::Pending(future) => future.await,
        }
    }
}

/// Return types accepted from handler methods.
pub trait MethodOutput: Send + 'static {
    fn into_outcome(self) -> Outcome;
}

impl MethodOutput for () {
    fn into_outcome(self) -> Outcome {
        Ok(None)
    }
}

/// Implementation for `Result<T, E>`: `Ok` becomes the output, `Err` is
/// captured as the handler's failure.
impl<T, E> MethodOutput for Result<T, E>
where
    T: Send + Sync + 'static,
    E: StdError + Send + Sync + 'static,
{
    fn into_outcome(self) -> Outcome {
        match self {
            Ok(value) => Ok(Some(HandlerOutput::new(value))),
            Err(error) => Err(Failure::new(error)),
        }
    }
}

/// An infallible method result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<T>(pub T);

impl<T: Send + Sync + 'static> MethodOutput for Reply<T> {
    fn into_outcome(self) -> Outcome {
        Ok(Some(HandlerOutput::new(self.0)))
    }
}

// ============================================================================
// Method traits
// ============================================================================

/// A synchronous handler method on `H`.
///
/// `Args` is a marker: the return type followed by the parameter types.
pub trait SyncMethod<H, Args>: Send + Sync + 'static {
    /// Describes the parameters, in order.
    fn params() -> Vec<ParamInfo>;

    /// Binds the arguments and calls the method.
    fn call(&self, handler: &H, args: &Arguments<'_>) -> PipelineResult<Outcome>;
}

/// An asynchronous handler method on `H`.
///
/// The handler is received as `Arc<H>` so the returned future owns
/// everything it uses.
pub trait AsyncMethod<H, Args>: Send + Sync + 'static {
    /// Describes the parameters, in order.
    fn params() -> Vec<ParamInfo>;

    /// Binds the arguments and starts the method.
    fn call(
        &self,
        handler: Arc<H>,
        args: &Arguments<'_>,
    ) -> PipelineResult<BoxFuture<'static, Outcome>>;
}

/// Macro to generate method implementations for functions with different arities.
macro_rules! impl_method {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, H, R, $($ty,)*> SyncMethod<H, (R, $($ty,)*)> for F
        where
            F: Fn(&H, $($ty,)*) -> R + Send + Sync + 'static,
            R: MethodOutput,
            $( $ty: Inject, )*
        {
            fn params() -> Vec<ParamInfo> {
                vec![$( ParamInfo::of::<$ty>(), )*]
            }

            fn call(&self, handler: &H, args: &Arguments<'_>) -> PipelineResult<Outcome> {
                let mut slots = args.bindings().iter().copied();
                $(
                    let $ty = args.bind::<$ty>(slots.next())?;
                )*

                Ok((self)(handler, $($ty,)*).into_outcome())
            }
        }

        #[allow(non_snake_case, unused_mut, unused_variables)]
        impl<F, H, Fut, R, $($ty,)*> AsyncMethod<H, (R, $($ty,)*)> for F
        where
            F: Fn(Arc<H>, $($ty,)*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = R> + Send + 'static,
            R: MethodOutput,
            $( $ty: Inject, )*
        {
            fn params() -> Vec<ParamInfo> {
                vec![$( ParamInfo::of::<$ty>(), )*]
            }

            fn call(
                &self,
                handler: Arc<H>,
                args: &Arguments<'_>,
            ) -> PipelineResult<BoxFuture<'static, Outcome>> {
                let mut slots = args.bindings().iter().copied();
                $(
                    let $ty = args.bind::<$ty>(slots.next())?;
                )*

                let future = (self)(handler, $($ty,)*);
                Ok(Box::pin(async move { future.await.into_outcome() }))
            }
        }
    };
}

// Generate implementations for 0-12 parameters
impl_method!();
impl_method!(T1);
impl_method!(T1, T2);
impl_method!(T1, T2, T3);
impl_method!(T1, T2, T3, T4);
impl_method!(T1, T2, T3, T4, T5);
impl_method!(T1, T2, T3, T4, T5, T6);
impl_method!(T1, T2, T3, T4, T5, T6, T7);
impl_method!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_method!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_method!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_method!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_method!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);
