//! Shared fixture for driving the standard tower end to end.
//!
//! [`Fixture`] owns a live standard document behind a synchronous in-memory
//! store and exposes the edits a rendering layer would make: document
//! operations through the document block's owned-context dispatch, sheet
//! operations through a page content dispatcher, line edits through the
//! chooser. [`ProbeRuntime`] counts every evaluation, so tests can assert
//! not just what a wave produced but which lines it actually touched.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use quire_core::block::result_or_error;
use quire_core::document::{
    add_page_at, delete_page_at, forest_dispatcher, move_page, nest_page, set_open_page,
    set_page_name, unnest_page,
};
use quire_core::pages::{page_at, page_content_dispatcher};
use quire_core::{
    Block, BlockTag, DocCtx, Dispatcher, EntryId, Environment, PagePath, PagesCtx, Value,
};

use quire_blocks::sheet::{delete_line, insert_line_after, set_line_name, update_line};
use quire_blocks::{
    AnyState, CalcRuntime, CancelHandle, ChooserState, Eval, Library, Runtime, Settle, SheetCtx,
    SheetState, StandardDocument, StandardDocumentState, StandardLine, StandardPage,
};

pub fn id(n: i64) -> EntryId {
    EntryId(n)
}

pub fn path(ids: &[i64]) -> Vec<EntryId> {
    ids.iter().map(|n| EntryId(*n)).collect()
}

// =============================================================================
// Probe runtime
// =============================================================================

struct Parked {
    id: u64,
    value: Value,
    settle: Settle,
}

/// A [`CalcRuntime`] wrapper that counts every evaluation and can hold
/// chosen codes in flight, settling them on demand.
pub struct ProbeRuntime {
    calc: CalcRuntime,
    evals: AtomicUsize,
    parked_codes: Mutex<HashSet<String>>,
    parked: Mutex<Vec<Parked>>,
    cancelled: Arc<Mutex<HashSet<u64>>>,
    next_id: AtomicU64,
}

impl ProbeRuntime {
    pub fn new() -> Self {
        Self {
            calc: CalcRuntime,
            evals: AtomicUsize::new(0),
            parked_codes: Mutex::new(HashSet::new()),
            parked: Mutex::new(Vec::new()),
            cancelled: Arc::new(Mutex::new(HashSet::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn evals(&self) -> usize {
        self.evals.load(Ordering::SeqCst)
    }

    /// Evaluations of exactly this source text park instead of finishing,
    /// until [`Self::release_all`].
    pub fn park(&self, code: &str) {
        self.parked_codes.lock().insert(code.to_string());
    }

    pub fn in_flight(&self) -> usize {
        self.parked.lock().len()
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.lock().len()
    }

    /// Settles every parked evaluation that was not cancelled, oldest
    /// first. Returns how many values were delivered.
    pub fn release_all(&self) -> usize {
        let parked: Vec<Parked> = std::mem::take(&mut *self.parked.lock());
        let mut delivered = 0;
        for eval in parked {
            let dropped = self.cancelled.lock().contains(&eval.id);
            if dropped {
                continue;
            }
            (eval.settle)(eval.value);
            delivered += 1;
        }
        delivered
    }
}

impl Runtime for ProbeRuntime {
    fn eval(&self, code: &str, env: &Environment, settle: Settle) -> Eval {
        self.evals.fetch_add(1, Ordering::SeqCst);
        let Eval::Ready { value, reads } = self.calc.eval(code, env, Box::new(|_| {})) else {
            unreachable!("the calculator finishes inline");
        };
        if self.parked_codes.lock().contains(code) {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.parked.lock().push(Parked { id, value, settle });
            let cancelled = Arc::clone(&self.cancelled);
            Eval::Pending {
                reads,
                cancel: CancelHandle::new(move || {
                    cancelled.lock().insert(id);
                }),
            }
        } else {
            Eval::Ready { value, reads }
        }
    }
}

// =============================================================================
// Fixture
// =============================================================================

pub struct Fixture {
    pub library: Library,
    pub block: StandardDocument,
    pub env: Environment,
    pub dispatch: Dispatcher<StandardDocumentState>,
    pub runtime: Arc<ProbeRuntime>,
    cell: Arc<Mutex<StandardDocumentState>>,
}

impl Fixture {
    pub fn new() -> Self {
        let runtime = Arc::new(ProbeRuntime::new());
        let library = Library::new(Arc::clone(&runtime) as Arc<dyn Runtime>);
        let block = library.standard_document();
        let env = library.standard_env();
        let cell = Arc::new(Mutex::new(block.init()));
        let store = Arc::clone(&cell);
        let dispatch = Dispatcher::new(move |action| {
            let mut state = store.lock();
            let current = state.clone();
            *state = action(current);
        });
        Self {
            library,
            block,
            env,
            dispatch,
            runtime,
            cell,
        }
    }

    pub fn doc(&self) -> StandardDocumentState {
        self.cell.lock().clone()
    }

    /// Replaces the whole document state, as loading a file would.
    pub fn install(&self, doc: StandardDocumentState) {
        self.dispatch.dispatch(move |_| doc);
    }

    pub fn evals(&self) -> usize {
        self.runtime.evals()
    }

    pub fn result(&self) -> Value {
        result_or_error(&self.block, &self.doc())
    }

    // =========================================================================
    // Document operations
    // =========================================================================

    pub fn edit_doc(
        &self,
        op: impl FnOnce(StandardDocumentState, &DocCtx<'_, StandardPage>) -> StandardDocumentState
        + Send
        + 'static,
    ) {
        self.block.inner().edit(&self.dispatch, &self.env, op);
    }

    pub fn add_page(&self, at: &[EntryId]) {
        let at = at.to_vec();
        self.edit_doc(move |doc, ctx| add_page_at(doc, &at, ctx));
    }

    pub fn delete_page(&self, at: &[EntryId]) {
        let at = at.to_vec();
        self.edit_doc(move |doc, ctx| delete_page_at(doc, &at, ctx));
    }

    pub fn rename_page(&self, at: &[EntryId], name: &str) {
        let at = at.to_vec();
        let name = name.to_string();
        self.edit_doc(move |doc, ctx| set_page_name(doc, &at, name, ctx));
    }

    pub fn move_page_by(&self, at: &[EntryId], offset: isize) {
        let at = at.to_vec();
        self.edit_doc(move |doc, ctx| move_page(doc, &at, offset, ctx));
    }

    pub fn nest(&self, at: &[EntryId]) {
        let at = at.to_vec();
        self.edit_doc(move |doc, ctx| nest_page(doc, &at, ctx));
    }

    pub fn unnest(&self, at: &[EntryId]) {
        let at = at.to_vec();
        self.edit_doc(move |doc, ctx| unnest_page(doc, &at, ctx));
    }

    pub fn open(&self, at: &[EntryId]) {
        let at = at.to_vec();
        self.edit_doc(move |doc, _| set_open_page(doc, &at));
    }

    pub fn open_path(&self) -> PagePath {
        self.doc().view_state.open_page.clone()
    }

    // =========================================================================
    // Line operations
    // =========================================================================

    /// A dispatcher scoped to the content of the page at `at`.
    pub fn content_dispatch(&self, at: &[EntryId]) -> Dispatcher<SheetState<ChooserState>> {
        let forest = forest_dispatcher(&self.dispatch);
        let page = self.library.page_block();
        let ctx = PagesCtx::new(&page, &self.env, &forest);
        page_content_dispatcher(&ctx, at)
    }

    /// Applies a sheet operation to the page at `at`, in the environment
    /// that page computes in.
    pub fn edit_sheet(
        &self,
        at: &[EntryId],
        op: impl FnOnce(SheetState<ChooserState>, &SheetCtx<'_, StandardLine>) -> SheetState<ChooserState>
        + Send
        + 'static,
    ) {
        let line = self.library.line_block();
        let env = self.library.page_env(&self.doc(), at);
        let content = self.content_dispatch(at);
        let inner = content.clone();
        content.dispatch(move |sheet| {
            let ctx = SheetCtx::new(&line, &env, &inner);
            op(sheet, &ctx)
        });
    }

    pub fn edit_line(
        &self,
        at: &[EntryId],
        line: EntryId,
        f: impl FnOnce(ChooserState) -> ChooserState + Send + 'static,
    ) {
        self.edit_sheet(at, move |sheet, ctx| update_line(sheet, line, f, ctx));
    }

    /// Points a line at the code block and gives it source, the two-step
    /// edit a UI makes: choose first, then type.
    pub fn set_line_code(&self, at: &[EntryId], line: EntryId, code: &str) {
        self.edit_line(at, line, |state| state.with_expr("blocks.code"));
        let code = code.to_string();
        self.edit_line(at, line, move |state| {
            state.map_inner(&BlockTag::new("code"), move |inner| match inner {
                AnyState::Code(code_state) => AnyState::Code(code_state.with_code(code)),
                other => other,
            })
        });
    }

    pub fn insert_line(&self, at: &[EntryId], after: Option<EntryId>) {
        self.edit_sheet(at, move |sheet, ctx| insert_line_after(sheet, after, ctx));
    }

    pub fn remove_line(&self, at: &[EntryId], line: EntryId) {
        self.edit_sheet(at, move |sheet, ctx| delete_line(sheet, line, ctx));
    }

    pub fn rename_line(&self, at: &[EntryId], line: EntryId, name: &str) {
        let name = name.to_string();
        self.edit_sheet(at, move |sheet, ctx| set_line_name(sheet, line, name, ctx));
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    pub fn page_result(&self, at: &[EntryId]) -> Value {
        let doc = self.doc();
        match page_at(&doc.pages, at) {
            Some(page) => result_or_error(&self.library.page_block(), &page.state),
            None => Value::Null,
        }
    }

    pub fn line_results(&self, at: &[EntryId]) -> Vec<Value> {
        let doc = self.doc();
        let line = self.library.line_block();
        page_at(&doc.pages, at)
            .map(|page| {
                page.state
                    .lines
                    .iter()
                    .map(|l| result_or_error(&line, &l.state))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn line_ids(&self, at: &[EntryId]) -> Vec<EntryId> {
        let doc = self.doc();
        page_at(&doc.pages, at)
            .map(|page| page.state.lines.iter().map(|l| l.id).collect())
            .unwrap_or_default()
    }

    pub fn page_ids(&self) -> Vec<EntryId> {
        self.doc().pages.iter().map(|p| p.id).collect()
    }
}
