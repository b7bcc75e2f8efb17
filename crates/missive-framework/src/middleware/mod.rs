//! Cross-cutting middlewares.
//!
//! These sit around the locator, resolver and executor:
//!
//! | Middleware | Position | Effect |
//! |---|---|---|
//! | [`TracingMiddleware`] | first | logs the start and outcome of each dispatch |
//! | [`ValidationMiddleware`] | before the executor | rejects invalid content |
//! | [`RecordingMiddleware`] | after the executor | appends a [`MessageRecord`](missive_core::MessageRecord) to a repository |

mod recording;
mod trace;
mod validation;

pub use recording::RecordingMiddleware;
pub use trace::TracingMiddleware;
pub use validation::{ValidationFailure, ValidationMiddleware};
