//! The evaluator boundary.
//!
//! Blocks that run user-written code do not interpret it themselves. They hand
//! the source text and the visible environment to a [`Runtime`] and get back
//! either a finished value or a pending computation that settles through a
//! callback later. [`CalcRuntime`](crate::calc::CalcRuntime) is the built-in
//! synchronous implementation; richer evaluators plug in behind the same
//! trait without the block layer changing.

use std::fmt;
use std::sync::Arc;

use quire_core::{Environment, Value};

/// Callback a runtime uses to deliver the value of a pending evaluation.
///
/// Called at most once. Runtimes that finish synchronously drop it unused.
pub type Settle = Box<dyn FnOnce(Value) + Send + 'static>;

/// Handle for abandoning an in-flight evaluation.
///
/// Cloneable so it can live inside block state. Cancellation is advisory: a
/// runtime may still settle after being cancelled, and callers discard such
/// late deliveries on their own.
#[derive(Clone)]
pub struct CancelHandle(Arc<dyn Fn() + Send + Sync>);

impl CancelHandle {
    pub fn new(cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(cancel))
    }

    pub fn cancel(&self) {
        (self.0)();
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CancelHandle")
    }
}

/// Outcome of starting an evaluation.
#[derive(Debug)]
pub enum Eval {
    /// The runtime finished on the spot.
    Ready {
        value: Value,
        /// Names the code looked up. Future recomputation is skipped unless
        /// one of them changes.
        reads: Vec<String>,
    },
    /// The runtime will settle later through the callback it was given.
    Pending {
        reads: Vec<String>,
        cancel: CancelHandle,
    },
}

/// A code evaluator.
pub trait Runtime: Send + Sync + 'static {
    /// Start evaluating `code` against `env`.
    ///
    /// Synchronous runtimes return [`Eval::Ready`]; asynchronous ones return
    /// [`Eval::Pending`] and call `settle` exactly once when the value is
    /// known, unless cancelled first.
    fn eval(&self, code: &str, env: &Environment, settle: Settle) -> Eval;
}
