//! Code blocks: user-written expressions evaluated by a [`Runtime`].
//!
//! A code block never blocks a recomputation wave. Synchronous runtimes hand
//! the value back inline; asynchronous ones leave the state pending and
//! settle later through the dispatcher. Every evaluation carries a token, and
//! a settle only lands if its token still matches the state's current
//! evaluation. Anything that superseded it in the meantime (an edit, a newer
//! recomputation) wins, so the last recomputation always determines the
//! result.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use quire_core::{Block, Dispatcher, Environment, Recomputed, Result, Value};
use quire_wire::Format;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::runtime::{CancelHandle, Eval, Runtime, Settle};

#[derive(Clone)]
pub struct CodeBlock {
    runtime: Arc<dyn Runtime>,
}

impl CodeBlock {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self { runtime }
    }
}

/// Source text plus the outcome of its most recent evaluation.
///
/// `computed` is `None` while the state is dirty: freshly initialized, just
/// edited, or just loaded. The next recomputation evaluates unconditionally;
/// afterwards only a change to one of the recorded reads triggers another.
#[derive(Debug, Clone)]
pub struct CodeState {
    code: String,
    computed: Option<Computed>,
}

#[derive(Debug, Clone)]
struct Computed {
    value: Value,
    reads: Vec<String>,
    /// Identifies the evaluation this outcome belongs to.
    token: u64,
    cancel: Option<CancelHandle>,
}

impl Computed {
    fn abandon(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }
}

// Evaluation bookkeeping (token, cancel handle) is not part of equality; two
// states agree when their code and visible outcome agree.
impl PartialEq for CodeState {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
            && match (&self.computed, &other.computed) {
                (None, None) => true,
                (Some(a), Some(b)) => a.value == b.value && a.reads == b.reads,
                _ => false,
            }
    }
}

impl CodeState {
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The most recently evaluated value, or pending while dirty.
    pub fn value(&self) -> Value {
        match &self.computed {
            Some(computed) => computed.value.clone(),
            None => Value::Pending,
        }
    }

    /// Replace the source text, cancelling any in-flight evaluation.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        if let Some(computed) = &self.computed {
            computed.abandon();
        }
        Self {
            code: code.into(),
            computed: None,
        }
    }
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

fn next_token() -> u64 {
    NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
}

/// Builds the callback a pending evaluation settles through.
fn settle_into(dispatch: Dispatcher<CodeState>, token: u64) -> Settle {
    Box::new(move |value| {
        dispatch.dispatch(move |mut state: CodeState| {
            match &mut state.computed {
                Some(computed) if computed.token == token => {
                    computed.value = value;
                    computed.cancel = None;
                }
                _ => tracing::debug!("ignoring a settle from a superseded evaluation"),
            }
            state
        });
    })
}

#[derive(Serialize, Deserialize)]
struct CodeV0 {
    code: String,
}

// Early documents stored a code block as its bare source string.
fn wire() -> Format<CodeV0> {
    Format::<CodeV0>::validator("quire.code").untagged(|json| {
        json.as_str().map(|code| CodeV0 {
            code: code.to_string(),
        })
    })
}

impl Block for CodeBlock {
    type State = CodeState;

    fn init(&self) -> CodeState {
        CodeState {
            code: String::new(),
            computed: None,
        }
    }

    fn recompute(
        &self,
        state: CodeState,
        dispatch: &Dispatcher<CodeState>,
        env: &Environment,
    ) -> Result<Recomputed<CodeState>> {
        let stale = match &state.computed {
            None => true,
            Some(computed) => env.any_changed(&computed.reads),
        };
        if !stale {
            return Ok(Recomputed::unchanged(state));
        }

        // Supersede whatever was in flight.
        if let Some(previous) = &state.computed {
            previous.abandon();
        }
        let token = next_token();
        let settle = settle_into(dispatch.clone(), token);
        let old_value = state.computed.as_ref().map(|c| c.value.clone());

        let computed = match self.runtime.eval(&state.code, env, settle) {
            Eval::Ready { value, reads } => Computed {
                value,
                reads,
                token,
                cancel: None,
            },
            Eval::Pending { reads, cancel } => Computed {
                value: Value::Pending,
                reads,
                token,
                cancel: Some(cancel),
            },
        };

        let invalidated = old_value.as_ref() != Some(&computed.value);
        Ok(Recomputed {
            state: CodeState {
                code: state.code,
                computed: Some(computed),
            },
            invalidated,
        })
    }

    fn result(&self, state: &CodeState) -> Result<Value> {
        Ok(state.value())
    }

    fn from_json(
        &self,
        json: &Json,
        _dispatch: &Dispatcher<CodeState>,
        _env: &Environment,
    ) -> Result<CodeState> {
        // Loaded dirty; the recomputation pass after loading evaluates it.
        let CodeV0 { code } = wire().load(json)?;
        Ok(CodeState {
            code,
            computed: None,
        })
    }

    fn to_json(&self, state: &CodeState) -> Result<Json> {
        Ok(wire().save(&CodeV0 {
            code: state.code.clone(),
        })?)
    }
}

// ==== Tests ============================================================
