//! The serial reducer that owns one live document.
//!
//! All mutation funnels through a single queue: dispatching an action
//! enqueues it, and whichever caller finds the reducer idle drains the
//! queue one action at a time. An action dispatched *while* one is being
//! applied (a block committing to itself, an asynchronous settle) simply
//! queues behind it, so there is never more than one action in flight and
//! no mutation ever observes a half-applied state.
//!
//! Around every application the session maintains the history contract:
//! the result of each action is committed as a snapshot, and an edit that
//! arrives while the user is viewing an old snapshot first adopts the
//! viewed state as the new basis. A panicking action is contained here —
//! the state is left as it was and the failure surfaces as a report, never
//! as a torn document.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;

use quire_wire::Format;

use crate::block::{Block, Result, result_or_error};
use crate::dispatch::{Action, Dispatcher};
use crate::env::Environment;
use crate::history::{History, HistoryEntry, HistoryMode};
use crate::now_millis;
use crate::report::{Report, Reporter};
use crate::value::Value;

/// Time-ordered identifier for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Serialize, Deserialize)]
struct EntryWire {
    time: u64,
    state: Json,
}

#[derive(Serialize, Deserialize)]
struct HistoryWire {
    history: Vec<EntryWire>,
    inner: Json,
}

/// The outermost persisted shape; documents written before tagging carry
/// the same fields with no tag.
fn history_format() -> Format<HistoryWire> {
    Format::<HistoryWire>::validator("quire.history")
        .untagged(|json| HistoryWire::deserialize(json).ok())
}

// =============================================================================
// Session
// =============================================================================

struct Shared<S> {
    history: Mutex<History<S>>,
    queue: Mutex<VecDeque<Action<S>>>,
    /// True while some caller is draining the queue.
    flushing: AtomicBool,
}

/// One open document: the outermost block, its environment, and the
/// history-wrapped state, behind the serial action queue.
pub struct Session<B: Block> {
    id: SessionId,
    block: B,
    env: Environment,
    reporter: Reporter,
    shared: Arc<Shared<B::State>>,
}

impl<B: Block> Session<B> {
    pub fn new(block: B, env: Environment, reporter: Reporter) -> Self {
        let inner = block.init();
        Self {
            id: SessionId::new(),
            block,
            env,
            reporter,
            shared: Arc::new(Shared {
                history: Mutex::new(History::new(inner)),
                queue: Mutex::new(VecDeque::new()),
                flushing: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn block(&self) -> &B {
        &self.block
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Receives every absorbed error from now on, starting with the
    /// buffered lost error if one was raised before anyone listened.
    pub fn subscribe_errors(&self, sink: impl Fn(Report) + Send + Sync + 'static) {
        self.reporter.subscribe(sink);
    }

    /// The sending half of this session's queue. Cloneable and cheap;
    /// blocks hold narrowed versions of it across asynchronous work.
    pub fn dispatcher(&self) -> Dispatcher<B::State> {
        session_dispatcher(&self.shared, &self.block, &self.env, &self.reporter)
    }

    /// The state a viewer should currently see: the viewed snapshot in
    /// viewing mode, the live state otherwise.
    pub fn shown(&self) -> B::State {
        self.flush_pending();
        self.with_queue_held(|s| {
            let dispatch = s.dispatcher();
            let mut history = s.shared.history.lock();
            let load = snapshot_loader(&s.block, &dispatch, &s.env, &s.reporter);
            if let Some(state) = history.shown(load) {
                return state.clone();
            }
            // The viewed snapshot would not load; the live state is all
            // there is.
            history.inner().clone()
        })
    }

    /// The shown state's exposed result, with failures folded into
    /// [`Value::Error`].
    pub fn result(&self) -> Value {
        result_or_error(&self.block, &self.shown())
    }

    // =========================================================================
    // History surface
    // =========================================================================

    pub fn history_mode(&self) -> HistoryMode {
        self.shared.history.lock().mode()
    }

    /// Snapshot timestamps, oldest first.
    pub fn timeline(&self) -> Vec<u64> {
        self.shared
            .history
            .lock()
            .entries()
            .iter()
            .map(|e| e.time())
            .collect()
    }

    pub fn open_history(&self) {
        self.flush_pending();
        self.shared.history.lock().open();
    }

    pub fn go_back(&self) {
        self.flush_pending();
        self.shared.history.lock().go_back();
    }

    pub fn go_forward(&self) {
        self.flush_pending();
        self.shared.history.lock().go_forward();
    }

    pub fn close_history(&self) {
        self.flush_pending();
        self.with_queue_held(|s| {
            let dispatch = s.dispatcher();
            let load = snapshot_loader(&s.block, &dispatch, &s.env, &s.reporter);
            s.shared.history.lock().close(now_millis(), load);
        });
    }

    pub fn use_this_state(&self) {
        self.flush_pending();
        self.with_queue_held(|s| {
            let dispatch = s.dispatcher();
            let load = snapshot_loader(&s.block, &dispatch, &s.env, &s.reporter);
            s.shared.history.lock().use_this_state(now_millis(), load);
        });
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Serializes the whole session. Snapshots that were never viewed are
    /// still raw JSON and pass through untouched.
    pub fn to_json(&self) -> Result<Json> {
        self.flush_pending();
        let history = self.shared.history.lock();
        let mut entries = Vec::with_capacity(history.len());
        for entry in history.entries() {
            entries.push(match entry {
                HistoryEntry::Saved { time, state } => EntryWire {
                    time: *time,
                    state: self.block.to_json(state)?,
                },
                HistoryEntry::Stored { time, json } => EntryWire {
                    time: *time,
                    state: (**json).clone(),
                },
            });
        }
        let inner = self.block.to_json(history.inner())?;
        Ok(history_format().save(&HistoryWire {
            history: entries,
            inner,
        })?)
    }

    /// Opens a persisted session: the live state loads eagerly and gets one
    /// full recomputation, history snapshots stay lazy until viewed.
    pub fn from_json(block: B, env: Environment, reporter: Reporter, json: &Json) -> Result<Self> {
        let wire = history_format().load(json)?;
        let session = Self::new(block, env, reporter);

        // The reducer stays held while loading so a settle fired from
        // `from_json` applies to the loaded state, not the placeholder.
        session.with_queue_held(move |s| -> Result<()> {
            let dispatch = s.dispatcher();
            let loaded = s.block.from_json(&wire.inner, &dispatch, &s.env)?;
            let kept = loaded.clone();
            let inner = match s.block.recompute(loaded, &dispatch, &s.env) {
                Ok(recomputed) => recomputed.state,
                Err(err) => {
                    s.reporter
                        .report(Report::new("Could not recompute block", err));
                    kept
                }
            };

            let entries = wire
                .history
                .into_iter()
                .map(|e| HistoryEntry::Stored {
                    time: e.time,
                    json: Arc::new(e.state),
                })
                .collect();
            *s.shared.history.lock() = History::from_parts(entries, inner);
            Ok(())
        })?;
        Ok(session)
    }

    fn flush_pending(&self) {
        flush(&self.shared, &self.block, &self.env, &self.reporter);
    }

    /// Runs `f` holding the reducer, so a dispatch fired inside `f` only
    /// queues; whatever queued is drained afterwards.
    fn with_queue_held<T>(&self, f: impl FnOnce(&Self) -> T) -> T {
        let already = self.shared.flushing.swap(true, Ordering::AcqRel);
        let result = f(self);
        if !already {
            self.shared.flushing.store(false, Ordering::Release);
            self.flush_pending();
        }
        result
    }
}

// =============================================================================
// The reducer
// =============================================================================

fn session_dispatcher<B: Block>(
    shared: &Arc<Shared<B::State>>,
    block: &B,
    env: &Environment,
    reporter: &Reporter,
) -> Dispatcher<B::State> {
    let shared = Arc::clone(shared);
    let block = block.clone();
    let env = env.clone();
    let reporter = reporter.clone();
    Dispatcher::new(move |action| {
        shared.queue.lock().push_back(action);
        flush(&shared, &block, &env, &reporter);
    })
}

/// Drains the queue unless someone else already is; that caller will pick
/// up anything enqueued meanwhile.
fn flush<B: Block>(
    shared: &Arc<Shared<B::State>>,
    block: &B,
    env: &Environment,
    reporter: &Reporter,
) {
    if shared.flushing.swap(true, Ordering::AcqRel) {
        return;
    }
    loop {
        loop {
            let Some(action) = shared.queue.lock().pop_front() else {
                break;
            };
            apply(shared, block, env, reporter, action);
        }
        shared.flushing.store(false, Ordering::Release);
        // Re-arm if an action landed between the last pop and the hand-off.
        if shared.queue.lock().is_empty() || shared.flushing.swap(true, Ordering::AcqRel) {
            return;
        }
    }
}

fn apply<B: Block>(
    shared: &Arc<Shared<B::State>>,
    block: &B,
    env: &Environment,
    reporter: &Reporter,
    action: Action<B::State>,
) {
    let dispatch = session_dispatcher(shared, block, env, reporter);
    let mut history = shared.history.lock();

    if let HistoryMode::Viewing { position } = history.mode() {
        let load = snapshot_loader(block, &dispatch, env, reporter);
        if !history.restore(position, now_millis(), load) {
            tracing::warn!("dropping an action dispatched against an unloadable snapshot");
            return;
        }
    }

    let state = history.inner().clone();
    match catch_unwind(AssertUnwindSafe(move || action(state))) {
        Ok(next) => history.commit(next, now_millis()),
        Err(payload) => {
            reporter.report(Report::new(
                "Last action failed",
                crate::block::BlockError::other(panic_text(payload)),
            ));
        }
    }
}

/// Loads a stored snapshot and recomputes it, since persisted states carry
/// no computed values.
fn snapshot_loader<'a, B: Block>(
    block: &'a B,
    dispatch: &'a Dispatcher<B::State>,
    env: &'a Environment,
    reporter: &'a Reporter,
) -> impl Fn(&Json) -> Option<B::State> + 'a {
    move |json| {
        let loaded = match block.from_json(json, dispatch, env) {
            Ok(state) => state,
            Err(err) => {
                reporter.report(Report::new("Could not load snapshot", err));
                return None;
            }
        };
        let kept = loaded.clone();
        match block.recompute(loaded, dispatch, env) {
            Ok(recomputed) => Some(recomputed.state),
            Err(err) => {
                reporter.report(Report::new("Could not recompute snapshot", err));
                Some(kept)
            }
        }
    }
}

fn panic_text(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
