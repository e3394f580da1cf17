//! Choosers: blocks whose kind is decided by an expression.
//!
//! A chooser evaluates its expression against the same environment its
//! siblings see. When the value is a block tag, the chooser instantiates
//! that variant from the [`Library`] and hosts its state; any other value
//! passes straight through as the chooser's own result. Re-evaluating to the
//! same tag keeps the hosted state alive, so editing the expression is
//! non-destructive until the choice actually changes.
//!
//! Choice resolution is synchronous by contract: a runtime that answers
//! `Pending` for a chooser expression gets cancelled and the chooser reports
//! the violation as an error value.

use quire_core::{
    Action, Block, BlockError, BlockTag, Dispatcher, Environment, Recomputed, Result, Value,
    block::result_or_error,
};
use quire_wire::Format;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::any::AnyState;
use crate::library::Library;
use crate::runtime::Eval;

#[derive(Clone)]
pub struct ChooserBlock {
    library: Library,
}

impl ChooserBlock {
    pub fn new(library: Library) -> Self {
        Self { library }
    }

    /// Evaluate the expression and resolve what it names. Keeps the hosted
    /// state when the resolved tag matches the current choice.
    fn choose(&self, state: ChooserState, env: &Environment) -> ChooserState {
        let (value, reads) = match self.library.runtime().eval(&state.expr, env, Box::new(|_| {}))
        {
            Eval::Ready { value, reads } => (value, reads),
            Eval::Pending { reads, cancel } => {
                cancel.cancel();
                let err = Value::error(BlockError::eval(
                    "a chooser expression must settle synchronously",
                ));
                (err, reads)
            }
        };

        let choice = match (value, state.choice) {
            (Value::Block(tag), Choice::Block { tag: current, state: inner })
                if current == tag =>
            {
                Choice::Block {
                    tag: current,
                    state: inner,
                }
            }
            (Value::Block(tag), _) => match self.library.instantiate(&tag) {
                Some(block) => Choice::Block {
                    tag,
                    state: Box::new(block.init()),
                },
                None => Choice::Value(Value::error(BlockError::eval(format!(
                    "no block named {tag}"
                )))),
            },
            (other, _) => Choice::Value(other),
        };

        ChooserState {
            expr: state.expr,
            reads: Some(reads),
            choice,
        }
    }
}

/// What a chooser's expression resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum Choice {
    /// Not a block; the chooser exposes this value directly. Null for an
    /// empty expression, an error for a failed one.
    Value(Value),
    /// A block variant, hosted live.
    Block { tag: BlockTag, state: Box<AnyState> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChooserState {
    expr: String,
    /// None until the expression has been evaluated at least once.
    reads: Option<Vec<String>>,
    choice: Choice,
}

impl ChooserState {
    pub fn expr(&self) -> &str {
        &self.expr
    }

    pub fn choice(&self) -> &Choice {
        &self.choice
    }

    /// Replace the choosing expression. The current choice stays live until
    /// the next recomputation re-resolves it.
    pub fn with_expr(self, expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            reads: None,
            choice: self.choice,
        }
    }

    /// Act on the hosted state, provided `tag` is still the live choice.
    pub fn map_inner(mut self, tag: &BlockTag, f: impl FnOnce(AnyState) -> AnyState) -> Self {
        self.choice = match self.choice {
            Choice::Block { tag: current, state } if current == *tag => Choice::Block {
                tag: current,
                state: Box::new(f(*state)),
            },
            other => {
                tracing::debug!(%tag, "ignoring an edit for a block that is no longer chosen");
                other
            }
        };
        self
    }
}

/// Scopes a dispatcher to the hosted state. The tag pins delivery: an action
/// built for a previous choice is dropped, never applied to its replacement.
fn choice_dispatcher(
    dispatch: &Dispatcher<ChooserState>,
    tag: BlockTag,
) -> Dispatcher<AnyState> {
    dispatch.contramap(move |action: Action<AnyState>| {
        let tag = tag.clone();
        Box::new(move |mut chooser: ChooserState| {
            match &mut chooser.choice {
                Choice::Block { tag: current, state } if *current == tag => {
                    let inner = (**state).clone();
                    **state = action(inner);
                }
                _ => tracing::debug!(%tag, "dropping an action for a superseded choice"),
            }
            chooser
        })
    })
}

#[derive(Serialize, Deserialize)]
struct ChooserV0 {
    expr: String,
    inner: Json,
}

// Pre-tag documents stored the same object shape, minus the tag.
fn wire() -> Format<ChooserV0> {
    Format::<ChooserV0>::validator("quire.chooser").untagged(|json| {
        let obj = json.as_object()?;
        let expr = obj.get("expr")?.as_str()?.to_string();
        let inner = obj.get("inner").cloned().unwrap_or(Json::Null);
        Some(ChooserV0 { expr, inner })
    })
}

impl Block for ChooserBlock {
    type State = ChooserState;

    fn init(&self) -> ChooserState {
        ChooserState {
            expr: String::new(),
            reads: None,
            choice: Choice::Value(Value::Null),
        }
    }

    fn recompute(
        &self,
        state: ChooserState,
        dispatch: &Dispatcher<ChooserState>,
        env: &Environment,
    ) -> Result<Recomputed<ChooserState>> {
        let old_result = self.result(&state)?;

        let needs_choice = match &state.reads {
            None => true,
            Some(reads) => env.any_changed(reads),
        };
        let mut state = if needs_choice {
            self.choose(state, env)
        } else {
            state
        };

        // A hosted block recomputes every wave; its own reads prune the work.
        state.choice = match state.choice {
            Choice::Block { tag, state: inner } => match self.library.instantiate(&tag) {
                Some(block) => {
                    let inner_dispatch = choice_dispatcher(dispatch, tag.clone());
                    let out = block.recompute(*inner, &inner_dispatch, env)?;
                    Choice::Block {
                        tag,
                        state: Box::new(out.state),
                    }
                }
                None => Choice::Value(Value::error(BlockError::eval(format!(
                    "no block named {tag}"
                )))),
            },
            keep => keep,
        };

        let new_result = self.result(&state)?;
        Ok(if new_result == old_result {
            Recomputed::unchanged(state)
        } else {
            Recomputed::changed(state)
        })
    }

    fn result(&self, state: &ChooserState) -> Result<Value> {
        match &state.choice {
            Choice::Value(value) => Ok(value.clone()),
            Choice::Block { tag, state } => match self.library.instantiate(tag) {
                Some(block) => Ok(result_or_error(&block, state)),
                None => Ok(Value::error(BlockError::eval(format!(
                    "no block named {tag}"
                )))),
            },
        }
    }

    fn from_json(
        &self,
        json: &Json,
        dispatch: &Dispatcher<ChooserState>,
        env: &Environment,
    ) -> Result<ChooserState> {
        let ChooserV0 { expr, inner } = wire().load(json)?;

        // Resolve the expression first; only then do we know whose
        // `from_json` interprets the inner payload.
        let mut state = self.choose(
            ChooserState {
                expr,
                reads: None,
                choice: Choice::Value(Value::Null),
            },
            env,
        );
        if let Choice::Block { tag, state: hosted } = &mut state.choice {
            if !inner.is_null() {
                if let Some(block) = self.library.instantiate(tag) {
                    let inner_dispatch = choice_dispatcher(dispatch, tag.clone());
                    **hosted = block.from_json(&inner, &inner_dispatch, env)?;
                }
            }
        }
        Ok(state)
    }

    fn to_json(&self, state: &ChooserState) -> Result<Json> {
        let inner = match &state.choice {
            Choice::Block { tag, state } => match self.library.instantiate(tag) {
                Some(block) => block.to_json(state)?,
                None => Json::Null,
            },
            Choice::Value(_) => Json::Null,
        };
        Ok(wire().save(&ChooserV0 {
            expr: state.expr.clone(),
            inner,
        })?)
    }
}

// ==== Tests ============================================================
