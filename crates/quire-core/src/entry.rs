//! Ordered sibling lists with prefix-stable incremental recomputation.
//!
//! An entry list is the flat dependency structure under sheets and page
//! levels: later entries may read earlier entries' results by name, never
//! the reverse. That deliberate restriction — a single left-to-right pass
//! instead of a dependency graph — is what makes change localization O(1):
//! everything *before* an edit is untouched by construction, everything
//! from the edit onward recomputes in order.
//!
//! # Environment composition
//!
//! Walking left to right, each entry's local environment layers:
//!
//! 1. the outer environment (globals plus enclosing scopes),
//! 2. every preceding sibling's exposed result, keyed by its name (or the
//!    positional default `$<id>` when unnamed), later siblings shadowing
//!    earlier ones,
//! 3. [`BEFORE`], the preceding-sibling map as a single record. Because it
//!    is rebuilt fresh each walk, an entry's own previous value can never
//!    leak into it — only genuinely-preceding bindings appear, including a
//!    binding the entry itself shadows.
//!
//! The walk also threads the set of names whose values changed, so a block
//! whose reads miss that set can keep its computation.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::block::{Block, Recomputed, result_or_error};
use crate::dispatch::{Action, Dispatcher};
use crate::env::{BEFORE, Environment};
use crate::value::Value;

/// Identifier unique among one sibling list, monotonically assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub i64);

impl EntryId {
    /// The positional fallback label for unnamed entries.
    pub fn default_name(&self) -> String {
        format!("${}", self.0)
    }
}

impl From<i64> for EntryId {
    fn from(id: i64) -> Self {
        EntryId(id)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `1 + max(existing)`, or 0 for an empty list.
pub fn next_free_id(ids: impl IntoIterator<Item = EntryId>) -> EntryId {
    EntryId(ids.into_iter().map(|id| id.0).max().map_or(0, |max| max + 1))
}

/// One named slot in a sibling list.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<S> {
    pub id: EntryId,
    pub name: String,
    pub state: S,
}

impl<S> Entry<S> {
    pub fn new(id: EntryId, name: impl Into<String>, state: S) -> Self {
        Self {
            id,
            name: name.into(),
            state,
        }
    }

    /// The label dependents bind this entry's result under.
    pub fn exposed_name(&self) -> String {
        if self.name.is_empty() {
            self.id.default_name()
        } else {
            self.name.clone()
        }
    }
}

/// Outcome of recomputing a sibling list.
#[derive(Debug)]
pub struct EntriesUpdate<S> {
    pub entries: Vec<Entry<S>>,
    /// Exposed names whose results changed during this pass, for the
    /// enclosing level's own changed set.
    pub changed: BTreeSet<String>,
}

// =============================================================================
// Scope accumulator
// =============================================================================

/// Accumulates sibling bindings left to right, producing each next
/// sibling's local environment. Shared by the entry and page engines.
pub(crate) struct SiblingScope {
    outer: Environment,
    results: IndexMap<String, Value>,
    /// Changed names inherited from the enclosing wave; ambient, not
    /// reported back to the caller.
    inherited: BTreeSet<String>,
    /// Changed names produced (or seeded) at this level; reported back.
    fresh: BTreeSet<String>,
}

impl SiblingScope {
    pub(crate) fn new(outer: Environment, seed: BTreeSet<String>) -> Self {
        let inherited = outer.changed().clone();
        Self {
            outer,
            results: IndexMap::new(),
            inherited,
            fresh: seed,
        }
    }

    /// The local environment for the sibling about to be visited.
    pub(crate) fn env_for_next(&self) -> Environment {
        let env = self.outer.extend(self.results.clone());
        let env = env.bind(BEFORE, Value::Record(Arc::new(self.results.clone())));
        let mut changed = self.inherited.clone();
        changed.extend(self.fresh.iter().cloned());
        env.with_changed(changed)
    }

    /// Exposes a visited sibling's result to everything after it.
    pub(crate) fn push(&mut self, name: String, value: Value, value_changed: bool) {
        if value_changed {
            self.fresh.insert(name.clone());
        }
        self.results.insert(name, value);
    }

    pub(crate) fn mark(&mut self, name: String) {
        self.fresh.insert(name);
    }

    pub(crate) fn results(&self) -> &IndexMap<String, Value> {
        &self.results
    }

    pub(crate) fn into_fresh(self) -> BTreeSet<String> {
        self.fresh
    }
}

// =============================================================================
// Recomputation
// =============================================================================

/// Recomputes `entries` from `from` onward, left to right.
///
/// `None` recomputes the whole list (full reset, e.g. initial load). With
/// an id, everything before its index is untouched and only contributes
/// bindings; the entry itself and everything after recompute in order. An
/// id that is no longer present is a silent no-op — a dispatch closure
/// holding a stale id may race a delete, and that race is tolerated rather
/// than surfaced.
///
/// `seed` pre-marks names as changed for this walk, for callers that know
/// something the value comparison cannot see (a rename, an applied action).
pub fn recompute_from<B: Block>(
    entries: Vec<Entry<B::State>>,
    from: Option<EntryId>,
    seed: BTreeSet<String>,
    block: &B,
    env: &Environment,
    dispatch: &Dispatcher<Vec<Entry<B::State>>>,
) -> EntriesUpdate<B::State> {
    let start = match from {
        None => 0,
        Some(id) => match entries.iter().position(|e| e.id == id) {
            Some(index) => index,
            None => {
                tracing::debug!(id = %id, "recompute target no longer present, leaving entries untouched");
                return EntriesUpdate {
                    entries,
                    changed: BTreeSet::new(),
                };
            }
        },
    };

    let mut out = entries;
    let tail = out.split_off(start);
    let mut scope = SiblingScope::new(env.clone(), seed);

    // The prefix is untouched; it only contributes its bindings.
    for entry in &out {
        scope.push(entry.exposed_name(), result_or_error(block, &entry.state), false);
    }

    out.reserve(tail.len());
    for mut entry in tail {
        let local_env = scope.env_for_next();
        let entry_dispatch = entry_dispatcher(dispatch, block, env, entry.id);
        let prior_value = result_or_error(block, &entry.state);

        let recomputed = match block.recompute(entry.state.clone(), &entry_dispatch, &local_env) {
            Ok(recomputed) => recomputed,
            Err(err) => {
                tracing::warn!(id = %entry.id, error = %err, "entry recompute failed, keeping previous state");
                Recomputed::unchanged(entry.state.clone())
            }
        };
        entry.state = recomputed.state;

        let value = result_or_error(block, &entry.state);
        let value_changed = recomputed.invalidated || value != prior_value;
        scope.push(entry.exposed_name(), value, value_changed);
        out.push(entry);
    }

    EntriesUpdate {
        entries: out,
        changed: scope.into_fresh(),
    }
}

/// Splices `action` into entry `id`'s state, then recomputes from there.
///
/// The changed-name seed compares the entry's exposed result before the
/// action against after it: an action can change the result without the
/// recompute noticing — an asynchronous settle committing its value is
/// exactly that — and followers must still see the name as changed.
pub fn update_entry_state<B: Block>(
    entries: Vec<Entry<B::State>>,
    id: EntryId,
    action: impl FnOnce(B::State) -> B::State,
    block: &B,
    env: &Environment,
    dispatch: &Dispatcher<Vec<Entry<B::State>>>,
) -> EntriesUpdate<B::State> {
    let Some(index) = entries.iter().position(|e| e.id == id) else {
        tracing::debug!(id = %id, "entry vanished before its action applied, ignoring");
        return EntriesUpdate {
            entries,
            changed: BTreeSet::new(),
        };
    };

    let mut entries = entries;
    let before_value = result_or_error(block, &entries[index].state);
    let state = entries[index].state.clone();
    entries[index].state = action(state);
    let after_value = result_or_error(block, &entries[index].state);

    let mut seed = BTreeSet::new();
    if after_value != before_value {
        seed.insert(entries[index].exposed_name());
    }

    recompute_from(entries, Some(id), seed, block, env, dispatch)
}

/// A dispatcher scoped to one entry's state.
///
/// Dispatching re-enters [`update_entry_state`], so an entry's later
/// self-dispatch lands in whatever position the entry occupies by then —
/// or nowhere, if it was deleted in the meantime.
pub fn entry_dispatcher<B: Block>(
    dispatch: &Dispatcher<Vec<Entry<B::State>>>,
    block: &B,
    env: &Environment,
    id: EntryId,
) -> Dispatcher<B::State> {
    let block = block.clone();
    let env = env.clone();
    let list_dispatch = dispatch.clone();
    dispatch.contramap(move |action: Action<B::State>| {
        let block = block.clone();
        let env = env.clone();
        let list_dispatch = list_dispatch.clone();
        Box::new(move |entries: Vec<Entry<B::State>>| {
            update_entry_state(entries, id, action, &block, &env, &list_dispatch).entries
        })
    })
}
