//! Sheets: vertical lists of named lines computed top to bottom.
//!
//! A sheet is the workhorse surface. Each line hosts a state of the sheet's
//! line block, sees every preceding sibling's result under its exposed name,
//! and contributes its own. Structural and content edits splice into the
//! entry engine so that nothing before the touched line is ever recomputed.
//!
//! Lines also carry presentation: whether the editor or only the result is
//! shown, and how wide the line renders. Presentation never feeds
//! recomputation; changing it is a pure state edit.

use std::collections::BTreeSet;

use quire_core::{
    Action, Block, Dispatcher, Entry, EntryId, Environment, Recomputed, Result, Value,
    block::result_or_error,
    entry::{entry_dispatcher, recompute_from, update_entry_state},
    next_free_id,
};
use quire_wire::Format;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A sheet of lines, all hosting states of one line block `B`.
#[derive(Clone)]
pub struct SheetBlock<B: Block> {
    line: B,
}

impl<B: Block> SheetBlock<B> {
    pub fn new(line: B) -> Self {
        Self { line }
    }

    pub fn line(&self) -> &B {
        &self.line
    }
}

/// How much of a line the surface shows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LineVisibility {
    /// Editor and result.
    #[default]
    Block,
    /// Result only.
    Result,
}

/// How wide a line renders.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LineWidth {
    Narrow,
    Wide,
    #[default]
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetLine<S> {
    pub id: EntryId,
    pub name: String,
    pub state: S,
    pub visibility: LineVisibility,
    pub width: LineWidth,
}

impl<S> SheetLine<S> {
    pub fn new(id: EntryId, name: impl Into<String>, state: S) -> Self {
        Self {
            id,
            name: name.into(),
            state,
            visibility: LineVisibility::default(),
            width: LineWidth::default(),
        }
    }

    /// The label dependents bind this line's result under.
    pub fn exposed_name(&self) -> String {
        if self.name.is_empty() {
            self.id.default_name()
        } else {
            self.name.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetState<S> {
    pub lines: Vec<SheetLine<S>>,
}

/// Everything a sheet operation needs around the state itself.
pub struct SheetCtx<'a, B: Block> {
    pub block: &'a B,
    pub env: &'a Environment,
    pub dispatch: &'a Dispatcher<SheetState<B::State>>,
}

impl<'a, B: Block> SheetCtx<'a, B> {
    pub fn new(
        block: &'a B,
        env: &'a Environment,
        dispatch: &'a Dispatcher<SheetState<B::State>>,
    ) -> Self {
        Self {
            block,
            env,
            dispatch,
        }
    }
}

// =============================================================================
// Entry engine bridge
// =============================================================================

type Presentation = Vec<(EntryId, LineVisibility, LineWidth)>;

fn split<S>(lines: Vec<SheetLine<S>>) -> (Vec<Entry<S>>, Presentation) {
    let mut entries = Vec::with_capacity(lines.len());
    let mut presentation = Vec::with_capacity(lines.len());
    for line in lines {
        presentation.push((line.id, line.visibility, line.width));
        entries.push(Entry::new(line.id, line.name, line.state));
    }
    (entries, presentation)
}

fn join<S>(entries: Vec<Entry<S>>, presentation: &Presentation) -> Vec<SheetLine<S>> {
    entries
        .into_iter()
        .map(|entry| {
            let (visibility, width) = presentation
                .iter()
                .find(|(id, ..)| *id == entry.id)
                .map(|(_, visibility, width)| (*visibility, *width))
                .unwrap_or_default();
            SheetLine {
                id: entry.id,
                name: entry.name,
                state: entry.state,
                visibility,
                width,
            }
        })
        .collect()
}

/// Narrows a sheet dispatcher to the entry list inside it. Presentation
/// survives by id across whatever the action does to the entries.
fn entries_dispatcher<S: Clone + Send + 'static>(
    dispatch: &Dispatcher<SheetState<S>>,
) -> Dispatcher<Vec<Entry<S>>> {
    dispatch.contramap(|action: Action<Vec<Entry<S>>>| {
        Box::new(move |sheet: SheetState<S>| {
            let (entries, presentation) = split(sheet.lines);
            SheetState {
                lines: join(action(entries), &presentation),
            }
        })
    })
}

fn recompute_lines_from<B: Block>(
    sheet: SheetState<B::State>,
    from: Option<EntryId>,
    seed: BTreeSet<String>,
    ctx: &SheetCtx<'_, B>,
) -> SheetState<B::State> {
    let (entries, presentation) = split(sheet.lines);
    let update = recompute_from(
        entries,
        from,
        seed,
        ctx.block,
        ctx.env,
        &entries_dispatcher(ctx.dispatch),
    );
    SheetState {
        lines: join(update.entries, &presentation),
    }
}

fn single(name: String) -> BTreeSet<String> {
    let mut seed = BTreeSet::new();
    seed.insert(name);
    seed
}

// =============================================================================
// Operations
// =============================================================================

/// Splices `action` into line `id`'s state and recomputes from there.
pub fn update_line<B: Block>(
    sheet: SheetState<B::State>,
    id: EntryId,
    action: impl FnOnce(B::State) -> B::State,
    ctx: &SheetCtx<'_, B>,
) -> SheetState<B::State> {
    let (entries, presentation) = split(sheet.lines);
    let update = update_entry_state(
        entries,
        id,
        action,
        ctx.block,
        ctx.env,
        &entries_dispatcher(ctx.dispatch),
    );
    SheetState {
        lines: join(update.entries, &presentation),
    }
}

/// Inserts a fresh line after `after`, or at the end for `None`.
pub fn insert_line_after<B: Block>(
    sheet: SheetState<B::State>,
    after: Option<EntryId>,
    ctx: &SheetCtx<'_, B>,
) -> SheetState<B::State> {
    let mut lines = sheet.lines;
    let id = next_free_id(lines.iter().map(|line| line.id));
    let index = match after {
        None => lines.len(),
        Some(anchor) => match lines.iter().position(|line| line.id == anchor) {
            Some(found) => found + 1,
            None => {
                tracing::debug!(id = %anchor, "insertion anchor no longer present, appending");
                lines.len()
            }
        },
    };
    lines.insert(index, SheetLine::new(id, "", ctx.block.init()));
    recompute_lines_from(
        SheetState { lines },
        Some(id),
        single(id.default_name()),
        ctx,
    )
}

/// Removes line `id` and recomputes everything after it.
pub fn delete_line<B: Block>(
    sheet: SheetState<B::State>,
    id: EntryId,
    ctx: &SheetCtx<'_, B>,
) -> SheetState<B::State> {
    let mut lines = sheet.lines;
    let Some(index) = lines.iter().position(|line| line.id == id) else {
        tracing::debug!(id = %id, "delete target no longer present, ignoring");
        return SheetState { lines };
    };
    let removed = lines.remove(index);
    let seed = single(removed.exposed_name());
    match lines.get(index) {
        Some(follower) => {
            let follower_id = follower.id;
            recompute_lines_from(SheetState { lines }, Some(follower_id), seed, ctx)
        }
        None => SheetState { lines },
    }
}

/// Renames line `id`. Dependents on either the old or the new exposed name
/// recompute; the prefix before the line does not.
pub fn set_line_name<B: Block>(
    sheet: SheetState<B::State>,
    id: EntryId,
    name: impl Into<String>,
    ctx: &SheetCtx<'_, B>,
) -> SheetState<B::State> {
    let name = name.into();
    let mut lines = sheet.lines;
    let Some(line) = lines.iter_mut().find(|line| line.id == id) else {
        tracing::debug!(id = %id, "rename target no longer present, ignoring");
        return SheetState { lines };
    };
    let old = line.exposed_name();
    line.name = name;
    let new = line.exposed_name();
    if old == new {
        return SheetState { lines };
    }
    let mut seed = BTreeSet::new();
    seed.insert(old);
    seed.insert(new);
    recompute_lines_from(SheetState { lines }, Some(id), seed, ctx)
}

pub fn set_line_visibility<S>(
    mut sheet: SheetState<S>,
    id: EntryId,
    visibility: LineVisibility,
) -> SheetState<S> {
    match sheet.lines.iter_mut().find(|line| line.id == id) {
        Some(line) => line.visibility = visibility,
        None => tracing::debug!(id = %id, "visibility target no longer present, ignoring"),
    }
    sheet
}

pub fn set_line_width<S>(mut sheet: SheetState<S>, id: EntryId, width: LineWidth) -> SheetState<S> {
    match sheet.lines.iter_mut().find(|line| line.id == id) {
        Some(line) => line.width = width,
        None => tracing::debug!(id = %id, "width target no longer present, ignoring"),
    }
    sheet
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Serialize, Deserialize)]
struct LineV2 {
    id: EntryId,
    name: String,
    visibility: LineVisibility,
    width: LineWidth,
    state: Json,
}

#[derive(Serialize, Deserialize)]
struct SheetV2 {
    lines: Vec<LineV2>,
}

#[derive(Deserialize)]
struct LineV1 {
    id: EntryId,
    name: String,
    visibility: LineVisibility,
    state: Json,
}

#[derive(Deserialize)]
struct SheetV1 {
    lines: Vec<LineV1>,
}

#[derive(Deserialize)]
struct LineV0 {
    id: EntryId,
    name: String,
    state: Json,
}

#[derive(Deserialize)]
struct SheetV0 {
    lines: Vec<LineV0>,
}

// v0 predates per-line visibility, v1 predates widths, and the oldest
// documents stored a sheet as a bare array of lines.
fn wire() -> Format<SheetV2> {
    Format::<SheetV0>::validator("quire.sheet")
        .untagged(|json| {
            Vec::<LineV0>::deserialize(json)
                .ok()
                .map(|lines| SheetV0 { lines })
        })
        .revision(|old: SheetV0| SheetV1 {
            lines: old
                .lines
                .into_iter()
                .map(|line| LineV1 {
                    id: line.id,
                    name: line.name,
                    visibility: LineVisibility::default(),
                    state: line.state,
                })
                .collect(),
        })
        .revision(|old: SheetV1| SheetV2 {
            lines: old
                .lines
                .into_iter()
                .map(|line| LineV2 {
                    id: line.id,
                    name: line.name,
                    visibility: line.visibility,
                    width: LineWidth::default(),
                    state: line.state,
                })
                .collect(),
        })
}

// =============================================================================
// Block contract
// =============================================================================

fn last_result<B: Block>(line: &B, sheet: &SheetState<B::State>) -> Value {
    match sheet.lines.last() {
        Some(last) => result_or_error(line, &last.state),
        None => Value::Null,
    }
}

impl<B: Block> Block for SheetBlock<B> {
    type State = SheetState<B::State>;

    fn init(&self) -> Self::State {
        // A fresh sheet has one empty line ready to edit.
        SheetState {
            lines: vec![SheetLine::new(EntryId(0), "", self.line.init())],
        }
    }

    fn recompute(
        &self,
        state: Self::State,
        dispatch: &Dispatcher<Self::State>,
        env: &Environment,
    ) -> Result<Recomputed<Self::State>> {
        let old = last_result(&self.line, &state);
        let ctx = SheetCtx::new(&self.line, env, dispatch);
        let next = recompute_lines_from(state, None, BTreeSet::new(), &ctx);
        let new = last_result(&self.line, &next);
        Ok(if new == old {
            Recomputed::unchanged(next)
        } else {
            Recomputed::changed(next)
        })
    }

    /// A sheet's result is its last line's; notebook-style, the bottom line
    /// is the summary.
    fn result(&self, state: &Self::State) -> Result<Value> {
        Ok(last_result(&self.line, state))
    }

    fn from_json(
        &self,
        json: &Json,
        dispatch: &Dispatcher<Self::State>,
        env: &Environment,
    ) -> Result<Self::State> {
        let SheetV2 { lines } = wire().load(json)?;
        let entries_dispatch = entries_dispatcher(dispatch);
        let mut out = Vec::with_capacity(lines.len());
        for line in lines {
            let line_dispatch = entry_dispatcher(&entries_dispatch, &self.line, env, line.id);
            let state = self.line.from_json(&line.state, &line_dispatch, env)?;
            out.push(SheetLine {
                id: line.id,
                name: line.name,
                state,
                visibility: line.visibility,
                width: line.width,
            });
        }
        Ok(SheetState { lines: out })
    }

    fn to_json(&self, state: &Self::State) -> Result<Json> {
        let lines = state
            .lines
            .iter()
            .map(|line| {
                Ok(LineV2 {
                    id: line.id,
                    name: line.name.clone(),
                    visibility: line.visibility,
                    width: line.width,
                    state: self.line.to_json(&line.state)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(wire().save(&SheetV2 { lines })?)
    }
}

// ==== Tests ============================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::calc::CalcRuntime;
    use crate::code::{CodeBlock, CodeState};
    use crate::runtime::{Eval, Runtime, Settle};

    /// CalcRuntime plus an evaluation counter, to observe what recomputes.
    #[derive(Clone, Default)]
    struct CountingCalc(Arc<AtomicUsize>);

    impl Runtime for CountingCalc {
        fn eval(&self, code: &str, env: &Environment, settle: Settle) -> Eval {
            self.0.fetch_add(1, Ordering::SeqCst);
            CalcRuntime.eval(code, env, settle)
        }
    }

    impl CountingCalc {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn sheet_of(codes: &[&str]) -> (SheetBlock<CodeBlock>, SheetState<CodeState>, CountingCalc) {
        let counter = CountingCalc::default();
        let block = SheetBlock::new(CodeBlock::new(Arc::new(counter.clone())));
        let lines = codes
            .iter()
            .enumerate()
            .map(|(i, code)| {
                SheetLine::new(
                    EntryId(i as i64),
                    "",
                    block.line().init().with_code(*code),
                )
            })
            .collect();
        (block, SheetState { lines }, counter)
    }

    fn cell(
        initial: SheetState<CodeState>,
    ) -> (Arc<Mutex<SheetState<CodeState>>>, Dispatcher<SheetState<CodeState>>) {
        let cell = Arc::new(Mutex::new(initial));
        let sink = Arc::clone(&cell);
        let dispatch = Dispatcher::new(move |action: Action<SheetState<CodeState>>| {
            let mut state = sink.lock();
            let current = state.clone();
            *state = action(current);
        });
        (cell, dispatch)
    }

    fn results(block: &SheetBlock<CodeBlock>, sheet: &SheetState<CodeState>) -> Vec<Value> {
        sheet
            .lines
            .iter()
            .map(|line| result_or_error(block.line(), &line.state))
            .collect()
    }

    #[test]
    fn test_init_has_one_empty_line() {
        let block = SheetBlock::new(CodeBlock::new(Arc::new(CalcRuntime)));
        let state = block.init();
        assert_eq!(state.lines.len(), 1);
        assert_eq!(state.lines[0].id, EntryId(0));
        assert_eq!(state.lines[0].exposed_name(), "$0");
    }

    #[test]
    fn test_lines_see_preceding_results() {
        let (block, state, _) = sheet_of(&["1", "$0 + 1", "$1 + 1"]);
        let out = block
            .recompute(state, &Dispatcher::null(), &Environment::new())
            .unwrap();
        assert!(out.invalidated);
        assert_eq!(
            results(&block, &out.state),
            vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]
        );
        assert_eq!(block.result(&out.state).unwrap(), Value::Number(3.0));
    }

    #[test]
    fn test_empty_sheet_result_is_null() {
        let block = SheetBlock::new(CodeBlock::new(Arc::new(CalcRuntime)));
        let state: SheetState<CodeState> = SheetState { lines: Vec::new() };
        assert_eq!(block.result(&state).unwrap(), Value::Null);
    }

    #[test]
    fn test_update_line_leaves_the_prefix_alone() {
        let (block, state, counter) = sheet_of(&["1", "$0 + 1", "$1 + 1"]);
        let env = Environment::new();
        let state = block
            .recompute(state, &Dispatcher::null(), &env)
            .unwrap()
            .state;
        let evals_after_full_pass = counter.count();
        assert_eq!(evals_after_full_pass, 3);

        let dispatch = Dispatcher::null();
        let ctx = SheetCtx::new(block.line(), &env, &dispatch);
        let state = update_line(state, EntryId(1), |code| code.with_code("$0 + 10"), &ctx);
        assert_eq!(
            results(&block, &state),
            vec![Value::Number(1.0), Value::Number(11.0), Value::Number(12.0)]
        );
        // The edited line and its follower, nothing before.
        assert_eq!(counter.count(), evals_after_full_pass + 2);
    }

    #[test]
    fn test_insert_line_after_assigns_a_fresh_id() {
        let (block, state, _) = sheet_of(&["1", "2"]);
        let env = Environment::new();
        let state = block
            .recompute(state, &Dispatcher::null(), &env)
            .unwrap()
            .state;

        let dispatch = Dispatcher::null();
        let ctx = SheetCtx::new(block.line(), &env, &dispatch);
        let state = insert_line_after(state, Some(EntryId(0)), &ctx);
        let ids: Vec<EntryId> = state.lines.iter().map(|line| line.id).collect();
        assert_eq!(ids, vec![EntryId(0), EntryId(2), EntryId(1)]);
        assert_eq!(
            results(&block, &state),
            vec![Value::Number(1.0), Value::Null, Value::Number(2.0)]
        );
    }

    #[test]
    fn test_delete_line_recomputes_followers() {
        let (block, state, counter) = sheet_of(&["1", "2", "$1 + 1"]);
        let env = Environment::new();
        let state = block
            .recompute(state, &Dispatcher::null(), &env)
            .unwrap()
            .state;
        let baseline = counter.count();

        let dispatch = Dispatcher::null();
        let ctx = SheetCtx::new(block.line(), &env, &dispatch);
        let state = delete_line(state, EntryId(1), &ctx);
        assert_eq!(state.lines.len(), 2);
        // "$1" is gone, so the follower now errors.
        assert!(results(&block, &state)[1].is_error());
        // Only the follower re-evaluated.
        assert_eq!(counter.count(), baseline + 1);
    }

    #[test]
    fn test_rename_rebinds_dependents() {
        let (block, state, _) = sheet_of(&["5", "base + 1"]);
        let env = Environment::new();
        let state = block
            .recompute(state, &Dispatcher::null(), &env)
            .unwrap()
            .state;
        assert!(results(&block, &state)[1].is_error());

        let dispatch = Dispatcher::null();
        let ctx = SheetCtx::new(block.line(), &env, &dispatch);
        let state = set_line_name(state, EntryId(0), "base", &ctx);
        assert_eq!(
            results(&block, &state),
            vec![Value::Number(5.0), Value::Number(6.0)]
        );
    }

    #[test]
    fn test_presentation_setters_do_not_recompute() {
        let (block, state, counter) = sheet_of(&["1", "$0 + 1"]);
        let env = Environment::new();
        let state = block
            .recompute(state, &Dispatcher::null(), &env)
            .unwrap()
            .state;
        let baseline = counter.count();

        let state = set_line_visibility(state, EntryId(0), LineVisibility::Result);
        let state = set_line_width(state, EntryId(1), LineWidth::Narrow);
        assert_eq!(state.lines[0].visibility, LineVisibility::Result);
        assert_eq!(state.lines[1].width, LineWidth::Narrow);
        assert_eq!(counter.count(), baseline);
    }

    #[test]
    fn test_presentation_survives_recomputation() {
        let (block, state, _) = sheet_of(&["1", "$0 + 1"]);
        let env = Environment::new();
        let state = set_line_width(state, EntryId(0), LineWidth::Narrow);
        let state = block
            .recompute(state, &Dispatcher::null(), &env)
            .unwrap()
            .state;
        assert_eq!(state.lines[0].width, LineWidth::Narrow);
    }

    #[test]
    fn test_settle_through_the_sheet_reaches_followers() {
        // An async settle lands on its line and the dependents recompute
        // even though no user edit happened.
        let (block, state, _) = sheet_of(&["1", "$0 + 1"]);
        let env = Environment::new();
        let (cell, dispatch) = cell(state);
        let current = cell.lock().clone();
        let out = block.recompute(current, &dispatch, &env).unwrap();
        *cell.lock() = out.state;

        // A later edit dispatched through the sheet dispatcher, standing in
        // for a settle callback.
        let ctx = SheetCtx::new(block.line(), &env, &dispatch);
        let current = cell.lock().clone();
        let next = update_line(current, EntryId(0), |code| code.with_code("100"), &ctx);
        *cell.lock() = next;
        assert_eq!(
            results(&block, &cell.lock()),
            vec![Value::Number(100.0), Value::Number(101.0)]
        );
    }

    // ==== Wire ============================================================

    #[test]
    fn test_round_trip_at_the_current_revision() {
        let (block, state, _) = sheet_of(&["1", "$0 + 1"]);
        let env = Environment::new();
        let state = set_line_visibility(state, EntryId(0), LineVisibility::Result);
        let state = block
            .recompute(state, &Dispatcher::null(), &env)
            .unwrap()
            .state;

        let json = block.to_json(&state).unwrap();
        assert_eq!(json["t"], "quire.sheet");
        assert_eq!(json["v"], 2);
        assert_eq!(json["lines"][0]["visibility"], "result");
        assert_eq!(json["lines"][0]["width"], "full");

        let loaded = block.from_json(&json, &Dispatcher::null(), &env).unwrap();
        assert_eq!(loaded.lines.len(), 2);
        assert_eq!(loaded.lines[0].visibility, LineVisibility::Result);
        assert_eq!(loaded.lines[1].state.code(), "$0 + 1");
    }

    #[test]
    fn test_v0_upgrade_fills_in_presentation() {
        let block = SheetBlock::new(CodeBlock::new(Arc::new(CalcRuntime)));
        let json = json!({
            "t": "quire.sheet", "v": 0,
            "lines": [{"id": 3, "name": "x", "state": "7"}],
        });
        let loaded = block
            .from_json(&json, &Dispatcher::null(), &Environment::new())
            .unwrap();
        assert_eq!(loaded.lines[0].visibility, LineVisibility::Block);
        assert_eq!(loaded.lines[0].width, LineWidth::Full);
        assert_eq!(loaded.lines[0].state.code(), "7");
    }

    #[test]
    fn test_v1_upgrade_fills_in_width() {
        let block = SheetBlock::new(CodeBlock::new(Arc::new(CalcRuntime)));
        let json = json!({
            "t": "quire.sheet", "v": 1,
            "lines": [{"id": 0, "name": "", "visibility": "result", "state": "1"}],
        });
        let loaded = block
            .from_json(&json, &Dispatcher::null(), &Environment::new())
            .unwrap();
        assert_eq!(loaded.lines[0].visibility, LineVisibility::Result);
        assert_eq!(loaded.lines[0].width, LineWidth::Full);
    }

    #[test]
    fn test_legacy_bare_array_loads() {
        let block = SheetBlock::new(CodeBlock::new(Arc::new(CalcRuntime)));
        let json = json!([{"id": 0, "name": "", "state": "1 + 1"}]);
        let loaded = block
            .from_json(&json, &Dispatcher::null(), &Environment::new())
            .unwrap();
        assert_eq!(loaded.lines[0].state.code(), "1 + 1");
        assert_eq!(loaded.lines[0].width, LineWidth::Full);
    }
}
