//! The block contract and its error-isolating wrapper.
//!
//! A block is a *value*, not an identity: two blocks with the same behavior
//! are interchangeable, and all of a block's persistent identity lives in
//! its `State`. The contract is deliberately small — initialize, bring a
//! possibly-stale state up to date, expose a result, load, save — and every
//! variant in the tree satisfies it, which is what lets sheets nest inside
//! pages inside documents without special cases.
//!
//! [`SafeBlock`] decorates any block so that no failure crosses the wrapper
//! boundary: a document keeps recomputing and persisting around one broken
//! node. That isolation is the load-bearing invariant of the whole system.

use serde_json::Value as Json;
use thiserror::Error;

use crate::dispatch::Dispatcher;
use crate::env::Environment;
use crate::report::{Report, Reporter};
use crate::value::Value;

pub type Result<T> = std::result::Result<T, BlockError>;

/// Why a block operation failed.
///
/// Kept `Clone + PartialEq` so failures can circulate as [`Value::Error`]
/// data and tests can assert on them structurally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlockError {
    /// Persisted JSON matched no known revision, or would not encode.
    #[error(transparent)]
    Wire(#[from] quire_wire::WireError),

    /// An expression failed to evaluate.
    #[error("evaluation failed: {0}")]
    Eval(String),

    /// A state reached a block variant that cannot own it.
    #[error("state does not belong to this block variant: expected {expected}, got {got}")]
    StateMismatch {
        expected: &'static str,
        got: &'static str,
    },

    /// Anything else a block wants to surface.
    #[error("{0}")]
    Other(String),
}

impl BlockError {
    pub fn eval(msg: impl Into<String>) -> Self {
        BlockError::Eval(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        BlockError::Other(msg.into())
    }
}

/// Outcome of bringing one block's state up to date.
#[derive(Debug, Clone, PartialEq)]
pub struct Recomputed<S> {
    pub state: S,
    /// True when the exposed result may differ from the input state's —
    /// the signal dependents use to decide whether they care.
    pub invalidated: bool,
}

impl<S> Recomputed<S> {
    pub fn changed(state: S) -> Self {
        Self {
            state,
            invalidated: true,
        }
    }

    pub fn unchanged(state: S) -> Self {
        Self {
            state,
            invalidated: false,
        }
    }

    pub fn map<T>(self, f: impl FnOnce(S) -> T) -> Recomputed<T> {
        Recomputed {
            state: f(self.state),
            invalidated: self.invalidated,
        }
    }
}

/// The capability table every block variant satisfies.
///
/// `recompute` and `from_json` receive a live [`Dispatcher`] scoped to this
/// block's own state: a block that starts an asynchronous computation hands
/// the dispatcher to its settle callback, which is how a result can change
/// later without any user-initiated edit. They also receive the
/// [`Environment`] carrying the names visible at the block's position and
/// the set of names whose values changed in the wave that reached it.
pub trait Block: Clone + Send + Sync + 'static {
    type State: Clone + Send + 'static;

    /// A fresh default state.
    fn init(&self) -> Self::State;

    /// Produces an up-to-date state from a possibly-stale one.
    fn recompute(
        &self,
        state: Self::State,
        dispatch: &Dispatcher<Self::State>,
        env: &Environment,
    ) -> Result<Recomputed<Self::State>>;

    /// The value this state exposes to dependent environments.
    fn result(&self, state: &Self::State) -> Result<Value>;

    /// Materializes persisted JSON.
    ///
    /// Needs live context because a dynamically-chosen inner block must
    /// evaluate its expression before it knows whose `from_json` to call.
    fn from_json(
        &self,
        json: &Json,
        dispatch: &Dispatcher<Self::State>,
        env: &Environment,
    ) -> Result<Self::State>;

    /// Serializes state as the current wire revision.
    fn to_json(&self, state: &Self::State) -> Result<Json>;
}

/// `block.result(state)`, with failures folded into [`Value::Error`].
pub fn result_or_error<B: Block>(block: &B, state: &B::State) -> Value {
    match block.result(state) {
        Ok(value) => value,
        Err(err) => Value::error(err),
    }
}

// =============================================================================
// Safe wrapper
// =============================================================================

/// Decorator that keeps every contract method total.
///
/// - `from_json` failure → the inner block's `init()`, reported.
/// - `recompute` failure → state unchanged, reported as
///   "Could not recompute block".
/// - `to_json` failure → JSON `null`, reported.
/// - `result` failure → the error itself as the exposed value.
///
/// Reports land in the [`Reporter`] sink; see that type for the buffering
/// rules before a consumer subscribes.
#[derive(Clone)]
pub struct SafeBlock<B> {
    inner: B,
    reporter: Reporter,
}

impl<B> SafeBlock<B> {
    pub fn new(inner: B, reporter: Reporter) -> Self {
        Self { inner, reporter }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }
}

impl<B: Block> Block for SafeBlock<B> {
    type State = B::State;

    fn init(&self) -> B::State {
        self.inner.init()
    }

    fn recompute(
        &self,
        state: B::State,
        dispatch: &Dispatcher<B::State>,
        env: &Environment,
    ) -> Result<Recomputed<B::State>> {
        let kept = state.clone();
        match self.inner.recompute(state, dispatch, env) {
            Ok(next) => Ok(next),
            Err(err) => {
                self.reporter.report(Report::new("Could not recompute block", err));
                Ok(Recomputed::unchanged(kept))
            }
        }
    }

    fn result(&self, state: &B::State) -> Result<Value> {
        Ok(result_or_error(&self.inner, state))
    }

    fn from_json(
        &self,
        json: &Json,
        dispatch: &Dispatcher<B::State>,
        env: &Environment,
    ) -> Result<B::State> {
        match self.inner.from_json(json, dispatch, env) {
            Ok(state) => Ok(state),
            Err(err) => {
                self.reporter.report(Report::new("Could not load block", err));
                Ok(self.inner.init())
            }
        }
    }

    fn to_json(&self, state: &B::State) -> Result<Json> {
        match self.inner.to_json(state) {
            Ok(json) => Ok(json),
            Err(err) => {
                self.reporter.report(Report::new("Could not save block", err));
                Ok(Json::Null)
            }
        }
    }
}
