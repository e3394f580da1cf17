//! Page forests with path-addressed change propagation.
//!
//! Pages generalize the flat sibling lists of [`crate::entry`] to a tree:
//! every page carries a content state plus an ordered list of child pages,
//! and the whole forest is addressed by root-to-node id paths. The same
//! left-to-right discipline applies at every level, extended with a
//! vertical rule: a page's children compute first and feed its content,
//! and the page's exposed result is its content's result.
//!
//! # Scoping
//!
//! ```text
//! outer env ──► sibling A ──► sibling B ──► sibling C
//!                               │   ▲
//!                   children of B   └─ B's content sees its children's
//!                   see outer env      results on top of the sibling
//!                   + A's binding      env (children compute first)
//!                   (never B's own)
//! ```
//!
//! # Change classes
//!
//! Two distinct kinds of change move through the forest, and they
//! propagate differently:
//!
//! - **Content changes** enter through [`update_page_state_at`] and bubble
//!   via [`recompute_pages_from`]: at the changed page's level only the
//!   *following* siblings recompute (the page's own result was already
//!   updated by its action, and its children's inputs did not change).
//!   Each enclosing level then decides whether the change escaped: if the
//!   child level reports no changed names, or the parent's own result
//!   comes out identical, propagation stops there.
//! - **Structural changes** (add/delete/move/nest/unnest, performed with
//!   [`update_page_siblings_at`]) enter through [`recompute_siblings_from`]
//!   at an *anchor index*: the spliced sibling list recomputes from that
//!   index inclusive, because the pages sitting there are the first whose
//!   input environment may differ, and the change then ascends through
//!   parents exactly like a content change.
//!
//! Both walks thread the set of changed names into every environment, so
//! a block whose reads miss the set can answer without redoing its work.

use std::collections::BTreeSet;
use std::mem;

use indexmap::IndexMap;

use crate::block::{Block, Recomputed, result_or_error};
use crate::dispatch::{Action, Dispatcher};
use crate::entry::{EntryId, SiblingScope};
use crate::env::Environment;
use crate::value::Value;

/// Root-to-node id sequence addressing one page in a forest.
pub type PagePath = Vec<EntryId>;

/// One node of the page forest.
#[derive(Debug, Clone, PartialEq)]
pub struct PageState<S> {
    pub id: EntryId,
    pub name: String,
    pub state: S,
    pub collapsed: bool,
    pub children: Vec<PageState<S>>,
}

impl<S> PageState<S> {
    pub fn new(id: EntryId, name: impl Into<String>, state: S) -> Self {
        Self {
            id,
            name: name.into(),
            state,
            collapsed: false,
            children: Vec::new(),
        }
    }

    /// The label siblings and the parent's content bind this page under.
    pub fn exposed_name(&self) -> String {
        if self.name.is_empty() {
            self.id.default_name()
        } else {
            self.name.clone()
        }
    }
}

/// Outcome of a recomputation walk over one forest.
#[derive(Debug)]
pub struct PagesUpdate<S> {
    pub pages: Vec<PageState<S>>,
    /// Exposed names at the *root* level whose results changed.
    pub changed: BTreeSet<String>,
}

/// What every walk over a forest needs: the content block, the root
/// environment the forest lives in, and the dispatcher actions re-enter
/// the forest through.
pub struct PagesCtx<'a, B: Block> {
    pub block: &'a B,
    pub env: &'a Environment,
    pub dispatch: &'a Dispatcher<Vec<PageState<B::State>>>,
}

impl<'a, B: Block> PagesCtx<'a, B> {
    pub fn new(
        block: &'a B,
        env: &'a Environment,
        dispatch: &'a Dispatcher<Vec<PageState<B::State>>>,
    ) -> Self {
        Self {
            block,
            env,
            dispatch,
        }
    }
}

// =============================================================================
// Lookups
// =============================================================================

/// The page addressed by `path`, if every id on the way exists.
pub fn page_at<'a, S>(pages: &'a [PageState<S>], path: &[EntryId]) -> Option<&'a PageState<S>> {
    let (head, tail) = path.split_first()?;
    let page = pages.iter().find(|p| p.id == *head)?;
    if tail.is_empty() {
        Some(page)
    } else {
        page_at(&page.children, tail)
    }
}

pub(crate) fn page_at_mut<'a, S>(
    pages: &'a mut [PageState<S>],
    path: &[EntryId],
) -> Option<&'a mut PageState<S>> {
    let (head, tail) = path.split_first()?;
    let page = pages.iter_mut().find(|p| p.id == *head)?;
    if tail.is_empty() {
        Some(page)
    } else {
        page_at_mut(&mut page.children, tail)
    }
}

/// The sibling list under `parent_path` (the roots for an empty path).
pub fn siblings_at_mut<'a, S>(
    pages: &'a mut Vec<PageState<S>>,
    parent_path: &[EntryId],
) -> Option<&'a mut Vec<PageState<S>>> {
    match parent_path.split_first() {
        None => Some(pages),
        Some((head, tail)) => {
            let page = pages.iter_mut().find(|p| p.id == *head)?;
            siblings_at_mut(&mut page.children, tail)
        }
    }
}

/// Replaces the sibling list under `parent_path` with `transform` of it.
///
/// Returns false (forest untouched) when the path is invalid.
pub fn update_page_siblings_at<S>(
    pages: &mut Vec<PageState<S>>,
    parent_path: &[EntryId],
    transform: impl FnOnce(Vec<PageState<S>>) -> Vec<PageState<S>>,
) -> bool {
    match siblings_at_mut(pages, parent_path) {
        Some(siblings) => {
            let list = mem::take(siblings);
            *siblings = transform(list);
            true
        }
        None => false,
    }
}

/// Where to land after removing the page at `path`: the following sibling,
/// else the preceding sibling, else the parent. `None` when the page was
/// the only root.
pub fn get_next_or_prev_path<S>(pages: &[PageState<S>], path: &[EntryId]) -> Option<PagePath> {
    let (last, parent_path) = path.split_last()?;
    let siblings: &[PageState<S>] = if parent_path.is_empty() {
        pages
    } else {
        &page_at(pages, parent_path)?.children
    };
    let index = siblings.iter().position(|p| p.id == *last)?;

    if index + 1 < siblings.len() {
        let mut next = parent_path.to_vec();
        next.push(siblings[index + 1].id);
        Some(next)
    } else if index > 0 {
        let mut prev = parent_path.to_vec();
        prev.push(siblings[index - 1].id);
        Some(prev)
    } else if parent_path.is_empty() {
        None
    } else {
        Some(parent_path.to_vec())
    }
}

// =============================================================================
// Recomputation walks
// =============================================================================

/// Propagates a content change out of the page at `path`.
///
/// - `None`: recompute every page at every level (full reset).
/// - `Some([])`: the change belongs to this level's parent; the children's
///   inputs did not move, so nothing recomputes.
/// - `Some([id])`: the page's own result already reflects the change (its
///   action ran before this walk); only its *followers* recompute, and its
///   name joins the changed set the enclosing level consumes.
/// - Longer paths descend, then on the way back up recompute the parent's
///   content with its children's fresh bindings — stopping early at any
///   level where nothing observable changed.
///
/// `seed` pre-marks names as changed at the *changed page's* level, for
/// callers that know something the value comparison cannot see.
pub fn recompute_pages_from<B: Block>(
    pages: Vec<PageState<B::State>>,
    path: Option<&[EntryId]>,
    seed: BTreeSet<String>,
    ctx: &PagesCtx<'_, B>,
) -> PagesUpdate<B::State> {
    recompute_level(pages, path, seed, ctx.env, &[], ctx)
}

/// Propagates a structural change to the sibling list under `parent_path`.
///
/// The list recomputes from `from_index` inclusive (each page with its
/// whole subtree), then the change ascends: the parent's content sees its
/// children's new bindings, and so on to the roots, stopping early where
/// results come out unchanged. `seed` carries the names the splice added,
/// removed, or moved.
pub fn recompute_siblings_from<B: Block>(
    pages: Vec<PageState<B::State>>,
    parent_path: &[EntryId],
    from_index: usize,
    seed: BTreeSet<String>,
    ctx: &PagesCtx<'_, B>,
) -> PagesUpdate<B::State> {
    splice_level(pages, parent_path, from_index, seed, ctx.env, &[], ctx)
}

/// Splices `action` into the content state of the page at `path`, then
/// propagates from there with [`recompute_pages_from`].
///
/// As with entries, the changed-name seed compares the page's exposed
/// result across the action, so a result change the recompute flags cannot
/// see (an asynchronous settle) still reaches dependents. A path that no
/// longer resolves is a silent no-op.
pub fn update_page_state_at<B: Block>(
    pages: Vec<PageState<B::State>>,
    path: &[EntryId],
    action: impl FnOnce(B::State) -> B::State,
    ctx: &PagesCtx<'_, B>,
) -> PagesUpdate<B::State> {
    let mut pages = pages;
    let (before_value, after_value, name) = match page_at_mut(&mut pages, path) {
        Some(page) => {
            let before = result_or_error(ctx.block, &page.state);
            let state = page.state.clone();
            page.state = action(state);
            let after = result_or_error(ctx.block, &page.state);
            (before, after, page.exposed_name())
        }
        None => {
            tracing::debug!(path = ?path, "page vanished before its action applied, ignoring");
            return PagesUpdate {
                pages,
                changed: BTreeSet::new(),
            };
        }
    };

    let mut seed = BTreeSet::new();
    if after_value != before_value {
        seed.insert(name);
    }

    recompute_pages_from(pages, Some(path), seed, ctx)
}

/// A dispatcher scoped to the content state of the page at `path`.
///
/// Dispatching re-enters [`update_page_state_at`], so a page's later
/// self-dispatch lands wherever the path resolves by then, or nowhere.
pub fn page_content_dispatcher<B: Block>(
    ctx: &PagesCtx<'_, B>,
    path: &[EntryId],
) -> Dispatcher<B::State> {
    let block = ctx.block.clone();
    let env = ctx.env.clone();
    let path = path.to_vec();
    let forest_dispatch = ctx.dispatch.clone();
    ctx.dispatch.contramap(move |action: Action<B::State>| {
        let block = block.clone();
        let env = env.clone();
        let path = path.clone();
        let forest_dispatch = forest_dispatch.clone();
        Box::new(move |pages: Vec<PageState<B::State>>| {
            let ctx = PagesCtx::new(&block, &env, &forest_dispatch);
            update_page_state_at(pages, &path, action, &ctx).pages
        })
    })
}

// =============================================================================
// Level walk internals
// =============================================================================

/// Recomputes one page in full: children first (as their own level, with
/// this page's sibling env as outer scope), then content with the
/// children's bindings layered on top. Returns the page, its exposed
/// result, and whether that result changed.
fn recompute_page<B: Block>(
    mut page: PageState<B::State>,
    sibling_env: &Environment,
    at: &[EntryId],
    ctx: &PagesCtx<'_, B>,
) -> (PageState<B::State>, Value, bool) {
    let mut path_here = at.to_vec();
    path_here.push(page.id);

    let children = mem::take(&mut page.children);
    let child_update = recompute_level(children, None, BTreeSet::new(), sibling_env, &path_here, ctx);
    page.children = child_update.pages;

    recompute_content(page, sibling_env, &child_update.changed, &path_here, ctx)
}

/// Recomputes one page's content against its current children.
fn recompute_content<B: Block>(
    mut page: PageState<B::State>,
    sibling_env: &Environment,
    child_changed: &BTreeSet<String>,
    path_here: &[EntryId],
    ctx: &PagesCtx<'_, B>,
) -> (PageState<B::State>, Value, bool) {
    let child_bindings: IndexMap<String, Value> = page
        .children
        .iter()
        .map(|child| (child.exposed_name(), result_or_error(ctx.block, &child.state)))
        .collect();

    let mut changed = sibling_env.changed().clone();
    changed.extend(child_changed.iter().cloned());
    let content_env = sibling_env.extend(child_bindings).with_changed(changed);
    let content_dispatch = page_content_dispatcher(ctx, path_here);

    let prior = result_or_error(ctx.block, &page.state);
    let recomputed = match ctx
        .block
        .recompute(page.state.clone(), &content_dispatch, &content_env)
    {
        Ok(recomputed) => recomputed,
        Err(err) => {
            tracing::warn!(id = %page.id, error = %err, "page content recompute failed, keeping previous state");
            Recomputed::unchanged(page.state.clone())
        }
    };
    page.state = recomputed.state;

    let value = result_or_error(ctx.block, &page.state);
    let value_changed = recomputed.invalidated || value != prior;
    (page, value, value_changed)
}

fn recompute_level<B: Block>(
    pages: Vec<PageState<B::State>>,
    path: Option<&[EntryId]>,
    seed: BTreeSet<String>,
    outer: &Environment,
    at: &[EntryId],
    ctx: &PagesCtx<'_, B>,
) -> PagesUpdate<B::State> {
    match path {
        None => {
            let mut scope = SiblingScope::new(outer.clone(), seed);
            let mut out = Vec::with_capacity(pages.len());
            for page in pages {
                let env = scope.env_for_next();
                let (page, value, changed) = recompute_page(page, &env, at, ctx);
                scope.push(page.exposed_name(), value, changed);
                out.push(page);
            }
            PagesUpdate {
                pages: out,
                changed: scope.into_fresh(),
            }
        }

        // The changed node is this level's parent: its content moved, not
        // its children's inputs.
        Some([]) => PagesUpdate {
            pages,
            changed: BTreeSet::new(),
        },

        Some([only]) => {
            let id = *only;
            let Some(index) = pages.iter().position(|p| p.id == id) else {
                tracing::debug!(id = %id, "changed page no longer present, leaving level untouched");
                return PagesUpdate {
                    pages,
                    changed: BTreeSet::new(),
                };
            };

            let mut scope = SiblingScope::new(outer.clone(), seed);
            let mut out = pages;
            let followers = out.split_off(index + 1);

            // Prefix and the changed page itself only contribute bindings;
            // the page's action already brought its result up to date.
            for page in &out {
                scope.push(page.exposed_name(), result_or_error(ctx.block, &page.state), false);
            }

            for page in followers {
                let env = scope.env_for_next();
                let (page, value, changed) = recompute_page(page, &env, at, ctx);
                scope.push(page.exposed_name(), value, changed);
                out.push(page);
            }

            PagesUpdate {
                pages: out,
                changed: scope.into_fresh(),
            }
        }

        Some([head, tail @ ..]) => {
            let head = *head;
            descend_level(pages, head, outer, at, ctx, move |children, env, path_here| {
                recompute_level(children, Some(tail), seed, env, path_here, ctx)
            })
        }
    }
}

fn splice_level<B: Block>(
    pages: Vec<PageState<B::State>>,
    parent_path: &[EntryId],
    from_index: usize,
    seed: BTreeSet<String>,
    outer: &Environment,
    at: &[EntryId],
    ctx: &PagesCtx<'_, B>,
) -> PagesUpdate<B::State> {
    match parent_path {
        [] => {
            let mut scope = SiblingScope::new(outer.clone(), seed);
            let mut out = pages;
            let from = from_index.min(out.len());
            let followers = out.split_off(from);

            for page in &out {
                scope.push(page.exposed_name(), result_or_error(ctx.block, &page.state), false);
            }

            for page in followers {
                let env = scope.env_for_next();
                let (page, value, changed) = recompute_page(page, &env, at, ctx);
                scope.push(page.exposed_name(), value, changed);
                out.push(page);
            }

            PagesUpdate {
                pages: out,
                changed: scope.into_fresh(),
            }
        }

        [head, tail @ ..] => {
            let head = *head;
            descend_level(pages, head, outer, at, ctx, move |children, env, path_here| {
                splice_level(children, tail, from_index, seed, env, path_here, ctx)
            })
        }
    }
}

/// The shared descent step of both walks: resolve the next page on the
/// path, run `child_walk` over its children, and ascend — recomputing this
/// page's content only when the child walk reports changed names, and its
/// followers only when this page's own result moved.
fn descend_level<B, F>(
    pages: Vec<PageState<B::State>>,
    head: EntryId,
    outer: &Environment,
    at: &[EntryId],
    ctx: &PagesCtx<'_, B>,
    child_walk: F,
) -> PagesUpdate<B::State>
where
    B: Block,
    F: FnOnce(Vec<PageState<B::State>>, &Environment, &[EntryId]) -> PagesUpdate<B::State>,
{
    let Some(index) = pages.iter().position(|p| p.id == head) else {
        tracing::debug!(id = %head, "page on the changed path no longer present, leaving level untouched");
        return PagesUpdate {
            pages,
            changed: BTreeSet::new(),
        };
    };

    let mut out = pages;
    let mut rest = out.split_off(index);
    let followers = rest.split_off(1);
    let mut focal = rest.remove(0);

    let mut scope = SiblingScope::new(outer.clone(), BTreeSet::new());
    for page in &out {
        scope.push(page.exposed_name(), result_or_error(ctx.block, &page.state), false);
    }
    let sibling_env = scope.env_for_next();

    let mut path_here = at.to_vec();
    path_here.push(focal.id);
    let children = mem::take(&mut focal.children);
    let child_update = child_walk(children, &sibling_env, &path_here);
    focal.children = child_update.pages;

    // Nothing escaped the subtree: reattach and stop.
    if child_update.changed.is_empty() {
        out.push(focal);
        out.extend(followers);
        return PagesUpdate {
            pages: out,
            changed: scope.into_fresh(),
        };
    }

    let (focal, value, focal_changed) =
        recompute_content(focal, &sibling_env, &child_update.changed, &path_here, ctx);
    scope.push(focal.exposed_name(), value, focal_changed);
    out.push(focal);

    // The page absorbed the change: its result is what it was, so its
    // followers' inputs are too.
    if !focal_changed {
        out.extend(followers);
        return PagesUpdate {
            pages: out,
            changed: scope.into_fresh(),
        };
    }

    for page in followers {
        let env = scope.env_for_next();
        let (page, value, changed) = recompute_page(page, &env, at, ctx);
        scope.push(page.exposed_name(), value, changed);
        out.push(page);
    }

    PagesUpdate {
        pages: out,
        changed: scope.into_fresh(),
    }
}
