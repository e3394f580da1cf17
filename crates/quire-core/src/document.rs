//! Document state: a page forest plus view state and a page template.
//!
//! The operations here are the document's structural surface: adding,
//! deleting, moving, nesting and unnesting pages, renaming them, and
//! splicing content actions into them. Each one follows the same shape:
//! perform the edit on the owned tree, fix up `view_state.open_page` so it
//! keeps addressing a live page, then hand the forest to the recomputation
//! walk in [`crate::pages`] with the right anchor and changed-name seed.
//!
//! Invalid paths are silent no-ops throughout. A structural operation may
//! race a dispatch closure holding a stale path; tolerating the miss is
//! deliberate.

use std::collections::BTreeSet;
use std::mem;

use crate::block::Block;
use crate::dispatch::{Action, Dispatcher};
use crate::entry::{EntryId, next_free_id};
use crate::env::Environment;
use crate::pages::{
    PagePath, PageState, PagesCtx, get_next_or_prev_path, page_at, page_at_mut,
    recompute_pages_from, recompute_siblings_from, siblings_at_mut, update_page_state_at,
};

/// The template page's id; the template lives outside the forest and is
/// addressed by the one-element path `[TEMPLATE_ID]`.
pub const TEMPLATE_ID: EntryId = EntryId(-1);

/// What the user is looking at; never triggers recomputation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub sidebar_open: bool,
    pub open_page: PagePath,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            sidebar_open: true,
            open_page: Vec::new(),
        }
    }
}

/// A page forest with view state and the prototype for new pages.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentState<S> {
    pub view_state: ViewState,
    /// Prototype cloned by [`add_page_at`]; never recomputed, never part
    /// of any sibling environment.
    pub template: PageState<S>,
    pub pages: Vec<PageState<S>>,
}

impl<S> DocumentState<S> {
    pub fn new(template: PageState<S>) -> Self {
        Self {
            view_state: ViewState::default(),
            template,
            pages: Vec::new(),
        }
    }

    /// The page `view_state.open_page` addresses, if it still exists.
    pub fn open_page(&self) -> Option<&PageState<S>> {
        if self.view_state.open_page.is_empty() {
            None
        } else {
            page_at(&self.pages, &self.view_state.open_page)
        }
    }
}

/// Everything a document operation needs around the state itself.
pub struct DocCtx<'a, B: Block> {
    pub block: &'a B,
    pub env: &'a Environment,
    pub dispatch: &'a Dispatcher<DocumentState<B::State>>,
}

impl<'a, B: Block> DocCtx<'a, B> {
    pub fn new(
        block: &'a B,
        env: &'a Environment,
        dispatch: &'a Dispatcher<DocumentState<B::State>>,
    ) -> Self {
        Self {
            block,
            env,
            dispatch,
        }
    }
}

/// Narrows a document dispatcher to the page forest inside it.
pub fn forest_dispatcher<S: 'static>(
    dispatch: &Dispatcher<DocumentState<S>>,
) -> Dispatcher<Vec<PageState<S>>> {
    dispatch.contramap(|action: Action<Vec<PageState<S>>>| {
        Box::new(move |mut doc: DocumentState<S>| {
            let pages = mem::take(&mut doc.pages);
            doc.pages = action(pages);
            doc
        })
    })
}

// =============================================================================
// View operations (no recomputation)
// =============================================================================

pub fn toggle_sidebar<S>(mut doc: DocumentState<S>) -> DocumentState<S> {
    doc.view_state.sidebar_open = !doc.view_state.sidebar_open;
    doc
}

/// Opens the page at `path`; an empty path closes the page view. Paths
/// that no longer resolve are ignored.
pub fn set_open_page<S>(mut doc: DocumentState<S>, path: &[EntryId]) -> DocumentState<S> {
    if path.is_empty() || page_at(&doc.pages, path).is_some() {
        doc.view_state.open_page = path.to_vec();
    } else {
        tracing::debug!(path = ?path, "cannot open a page that is not there, ignoring");
    }
    doc
}

pub fn set_page_collapsed<S>(
    mut doc: DocumentState<S>,
    path: &[EntryId],
    collapsed: bool,
) -> DocumentState<S> {
    match page_at_mut(&mut doc.pages, path) {
        Some(page) => page.collapsed = collapsed,
        None => tracing::debug!(path = ?path, "collapse target no longer present, ignoring"),
    }
    doc
}

// =============================================================================
// Content and name edits
// =============================================================================

/// Splices `action` into the content of the page at `path` and propagates.
///
/// The path `[TEMPLATE_ID]` edits the template instead; prototypes are
/// plain data and never recompute.
pub fn update_page_at<B: Block>(
    doc: DocumentState<B::State>,
    path: &[EntryId],
    action: impl FnOnce(B::State) -> B::State,
    ctx: &DocCtx<'_, B>,
) -> DocumentState<B::State> {
    let mut doc = doc;
    if matches!(path, [TEMPLATE_ID]) {
        let state = doc.template.state.clone();
        doc.template.state = action(state);
        return doc;
    }

    let forest = forest_dispatcher(ctx.dispatch);
    let pctx = PagesCtx::new(ctx.block, ctx.env, &forest);
    let pages = mem::take(&mut doc.pages);
    doc.pages = update_page_state_at(pages, path, action, &pctx).pages;
    doc
}

/// Renames the page at `path` and recomputes everything that could have
/// read either the old or the new name.
///
/// A rename is not a content change: the page's own children never
/// recompute, only its followers and ancestors' content do.
pub fn set_page_name<B: Block>(
    doc: DocumentState<B::State>,
    path: &[EntryId],
    name: impl Into<String>,
    ctx: &DocCtx<'_, B>,
) -> DocumentState<B::State> {
    let mut doc = doc;
    if matches!(path, [TEMPLATE_ID]) {
        doc.template.name = name.into();
        return doc;
    }

    let (old_name, new_name) = match page_at_mut(&mut doc.pages, path) {
        Some(page) => {
            let old = page.exposed_name();
            page.name = name.into();
            (old, page.exposed_name())
        }
        None => {
            tracing::debug!(path = ?path, "rename target no longer present, ignoring");
            return doc;
        }
    };
    if old_name == new_name {
        return doc;
    }

    let mut seed = BTreeSet::new();
    seed.insert(old_name);
    seed.insert(new_name);

    let forest = forest_dispatcher(ctx.dispatch);
    let pctx = PagesCtx::new(ctx.block, ctx.env, &forest);
    let pages = mem::take(&mut doc.pages);
    doc.pages = recompute_pages_from(pages, Some(path), seed, &pctx).pages;
    doc
}

// =============================================================================
// Structural operations
// =============================================================================

fn splice<B: Block>(
    mut doc: DocumentState<B::State>,
    parent_path: &[EntryId],
    from_index: usize,
    seed: BTreeSet<String>,
    ctx: &DocCtx<'_, B>,
) -> DocumentState<B::State> {
    let forest = forest_dispatcher(ctx.dispatch);
    let pctx = PagesCtx::new(ctx.block, ctx.env, &forest);
    let pages = mem::take(&mut doc.pages);
    doc.pages = recompute_siblings_from(pages, parent_path, from_index, seed, &pctx).pages;
    doc
}

fn single_seed(name: String) -> BTreeSet<String> {
    let mut seed = BTreeSet::new();
    seed.insert(name);
    seed
}

/// Inserts a fresh page (cloned from the template) right after the page at
/// `path` and opens it. An empty path appends to the end of the roots.
pub fn add_page_at<B: Block>(
    doc: DocumentState<B::State>,
    path: &[EntryId],
    ctx: &DocCtx<'_, B>,
) -> DocumentState<B::State> {
    let mut doc = doc;
    let (insert_after, parent_path) = match path.split_last() {
        Some((last, parent)) => (Some(*last), parent),
        None => (None, path),
    };

    let template_state = doc.template.state.clone();
    let (index, id) = {
        let Some(siblings) = siblings_at_mut(&mut doc.pages, parent_path) else {
            tracing::debug!(path = ?path, "add target path no longer resolves, ignoring");
            return doc;
        };
        let index = match insert_after {
            None => siblings.len(),
            Some(id) => match siblings.iter().position(|p| p.id == id) {
                Some(i) => i + 1,
                None => {
                    tracing::debug!(path = ?path, "add target no longer present, ignoring");
                    return doc;
                }
            },
        };
        let id = next_free_id(siblings.iter().map(|p| p.id));
        siblings.insert(index, PageState::new(id, "", template_state));
        (index, id)
    };

    let mut open = parent_path.to_vec();
    open.push(id);
    doc.view_state.open_page = open;

    splice(doc, parent_path, index, single_seed(id.default_name()), ctx)
}

/// Removes the page at `path` with its whole subtree.
///
/// If the open page was inside the removed subtree, the view moves to the
/// following sibling, else the preceding one, else the parent.
pub fn delete_page_at<B: Block>(
    doc: DocumentState<B::State>,
    path: &[EntryId],
    ctx: &DocCtx<'_, B>,
) -> DocumentState<B::State> {
    let mut doc = doc;
    let Some((last, parent_path)) = path.split_last() else {
        tracing::debug!("cannot delete an empty path, ignoring");
        return doc;
    };

    let landing = get_next_or_prev_path(&doc.pages, path);

    let (index, name) = {
        let Some(siblings) = siblings_at_mut(&mut doc.pages, parent_path) else {
            tracing::debug!(path = ?path, "delete target path no longer resolves, ignoring");
            return doc;
        };
        let Some(index) = siblings.iter().position(|p| p.id == *last) else {
            tracing::debug!(path = ?path, "delete target no longer present, ignoring");
            return doc;
        };
        let name = siblings[index].exposed_name();
        siblings.remove(index);
        (index, name)
    };

    if doc.view_state.open_page.starts_with(path) {
        doc.view_state.open_page = landing.unwrap_or_default();
    }

    splice(doc, parent_path, index, single_seed(name), ctx)
}

/// Moves the page at `path` by `offset` within its siblings, clamped to
/// the list. Id paths are position-independent, so the open page needs no
/// fixup.
pub fn move_page<B: Block>(
    doc: DocumentState<B::State>,
    path: &[EntryId],
    offset: isize,
    ctx: &DocCtx<'_, B>,
) -> DocumentState<B::State> {
    let mut doc = doc;
    let Some((last, parent_path)) = path.split_last() else {
        tracing::debug!("cannot move an empty path, ignoring");
        return doc;
    };

    let (from_index, name) = {
        let Some(siblings) = siblings_at_mut(&mut doc.pages, parent_path) else {
            tracing::debug!(path = ?path, "move target path no longer resolves, ignoring");
            return doc;
        };
        let Some(old) = siblings.iter().position(|p| p.id == *last) else {
            tracing::debug!(path = ?path, "move target no longer present, ignoring");
            return doc;
        };
        let last_index = siblings.len() as isize - 1;
        let new = (old as isize + offset).clamp(0, last_index) as usize;
        if new == old {
            return doc;
        }
        let page = siblings.remove(old);
        let name = page.exposed_name();
        siblings.insert(new, page);
        (old.min(new), name)
    };

    splice(doc, parent_path, from_index, single_seed(name), ctx)
}

/// Makes the page at `path` the last child of its preceding sibling.
///
/// The moved page gets a fresh id from its new sibling list; a page with
/// no preceding sibling stays where it is.
pub fn nest_page<B: Block>(
    doc: DocumentState<B::State>,
    path: &[EntryId],
    ctx: &DocCtx<'_, B>,
) -> DocumentState<B::State> {
    let mut doc = doc;
    let Some((last, parent_path)) = path.split_last() else {
        tracing::debug!("cannot nest an empty path, ignoring");
        return doc;
    };

    let (from_index, old_name, new_name, new_parent_id, new_id) = {
        let Some(siblings) = siblings_at_mut(&mut doc.pages, parent_path) else {
            tracing::debug!(path = ?path, "nest target path no longer resolves, ignoring");
            return doc;
        };
        let Some(index) = siblings.iter().position(|p| p.id == *last) else {
            tracing::debug!(path = ?path, "nest target no longer present, ignoring");
            return doc;
        };
        if index == 0 {
            return doc;
        }
        let mut page = siblings.remove(index);
        let old_name = page.exposed_name();
        let new_parent_index = index - 1;
        let new_parent_id = siblings[new_parent_index].id;
        let new_id = next_free_id(siblings[new_parent_index].children.iter().map(|p| p.id));
        page.id = new_id;
        let new_name = page.exposed_name();
        siblings[new_parent_index].children.push(page);
        (new_parent_index, old_name, new_name, new_parent_id, new_id)
    };

    if doc.view_state.open_page.starts_with(path) {
        let mut open = parent_path.to_vec();
        open.push(new_parent_id);
        open.push(new_id);
        open.extend(doc.view_state.open_page[path.len()..].iter().copied());
        doc.view_state.open_page = open;
    }

    let mut seed = BTreeSet::new();
    seed.insert(old_name);
    seed.insert(new_name);
    splice(doc, parent_path, from_index, seed, ctx)
}

/// Moves the page at `path` out of its parent, to right after it.
///
/// The moved page gets a fresh id from its new sibling list; a root page
/// stays where it is.
pub fn unnest_page<B: Block>(
    doc: DocumentState<B::State>,
    path: &[EntryId],
    ctx: &DocCtx<'_, B>,
) -> DocumentState<B::State> {
    let mut doc = doc;
    let Some((last, parent_path)) = path.split_last() else {
        tracing::debug!("cannot unnest an empty path, ignoring");
        return doc;
    };
    let Some((parent_id, grand_path)) = parent_path.split_last() else {
        // already a root
        return doc;
    };

    let (from_index, old_name, new_name, new_id) = {
        let Some(siblings) = siblings_at_mut(&mut doc.pages, grand_path) else {
            tracing::debug!(path = ?path, "unnest target path no longer resolves, ignoring");
            return doc;
        };
        let Some(parent_index) = siblings.iter().position(|p| p.id == *parent_id) else {
            tracing::debug!(path = ?path, "unnest parent no longer present, ignoring");
            return doc;
        };
        let Some(child_index) = siblings[parent_index]
            .children
            .iter()
            .position(|p| p.id == *last)
        else {
            tracing::debug!(path = ?path, "unnest target no longer present, ignoring");
            return doc;
        };
        let mut page = siblings[parent_index].children.remove(child_index);
        let old_name = page.exposed_name();
        let new_id = next_free_id(siblings.iter().map(|p| p.id));
        page.id = new_id;
        let new_name = page.exposed_name();
        siblings.insert(parent_index + 1, page);
        (parent_index, old_name, new_name, new_id)
    };

    if doc.view_state.open_page.starts_with(path) {
        let mut open = grand_path.to_vec();
        open.push(new_id);
        open.extend(doc.view_state.open_page[path.len()..].iter().copied());
        doc.view_state.open_page = open;
    }

    let mut seed = BTreeSet::new();
    seed.insert(old_name);
    seed.insert(new_name);
    splice(doc, grand_path, from_index, seed, ctx)
}
