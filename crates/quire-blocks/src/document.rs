//! The document block: a page forest behind the block contract.
//!
//! The structural work lives in `quire_core::document`; this wrapper gives
//! it a block's shape so a whole document can sit at the top of a session,
//! persist itself, and expose a result like any other block. Its result is
//! the open page's, null when nothing is open.

use std::collections::BTreeSet;
use std::mem;

use quire_core::{
    Action, Block, Dispatcher, DocCtx, DocumentState, EntryId, Environment, PagePath, PageState,
    Recomputed, Result, TEMPLATE_ID, Value,
    block::result_or_error,
    document::forest_dispatcher,
    pages::{PagesCtx, page_content_dispatcher, recompute_pages_from},
};
use quire_wire::Format;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A document whose pages carry states of the content block `B`.
#[derive(Clone)]
pub struct DocumentBlock<B: Block> {
    page: B,
}

impl<B: Block> DocumentBlock<B> {
    pub fn new(page: B) -> Self {
        Self { page }
    }

    pub fn page(&self) -> &B {
        &self.page
    }

    /// Dispatches a document operation with owned context, so callers can
    /// edit from anywhere without borrowing this block.
    pub fn edit(
        &self,
        dispatch: &Dispatcher<DocumentState<B::State>>,
        env: &Environment,
        op: impl FnOnce(DocumentState<B::State>, &DocCtx<'_, B>) -> DocumentState<B::State>
        + Send
        + 'static,
    ) {
        let block = self.page.clone();
        let env = env.clone();
        let doc_dispatch = dispatch.clone();
        dispatch.dispatch(move |doc| {
            let ctx = DocCtx::new(&block, &env, &doc_dispatch);
            op(doc, &ctx)
        });
    }

    fn load_pages(
        &self,
        pages: Vec<PageV0>,
        forest: &Dispatcher<Vec<PageState<B::State>>>,
        env: &Environment,
        prefix: &[EntryId],
    ) -> Result<Vec<PageState<B::State>>> {
        pages
            .into_iter()
            .map(|page| {
                let mut path = prefix.to_vec();
                path.push(page.id);
                let ctx = PagesCtx::new(&self.page, env, forest);
                let content_dispatch = page_content_dispatcher(&ctx, &path);
                let state = self.page.from_json(&page.state, &content_dispatch, env)?;
                let children = self.load_pages(page.children, forest, env, &path)?;
                Ok(PageState {
                    id: page.id,
                    name: page.name,
                    state,
                    collapsed: page.is_collapsed,
                    children,
                })
            })
            .collect()
    }

    fn save_page(&self, page: &PageState<B::State>) -> Result<PageV0> {
        Ok(PageV0 {
            id: page.id,
            name: page.name.clone(),
            state: self.page.to_json(&page.state)?,
            is_collapsed: page.collapsed,
            children: self.save_pages(&page.children)?,
        })
    }

    fn save_pages(&self, pages: &[PageState<B::State>]) -> Result<Vec<PageV0>> {
        pages.iter().map(|page| self.save_page(page)).collect()
    }
}

/// Narrows a document dispatcher to the template's content state. Template
/// edits apply without recomputation; nothing depends on the template.
fn template_dispatcher<S: Clone + Send + 'static>(
    dispatch: &Dispatcher<DocumentState<S>>,
) -> Dispatcher<S> {
    dispatch.contramap(|action: Action<S>| {
        Box::new(move |mut doc: DocumentState<S>| {
            let state = doc.template.state.clone();
            doc.template.state = action(state);
            doc
        })
    })
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageV0 {
    id: EntryId,
    name: String,
    state: Json,
    is_collapsed: bool,
    children: Vec<PageV0>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewStateV0 {
    sidebar_open: bool,
    open_page: PagePath,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentV0 {
    pages: Vec<PageV0>,
    view_state: ViewStateV0,
    template: PageV0,
}

// Pre-tag documents stored the same object shape, minus the tag.
fn wire() -> Format<DocumentV0> {
    Format::<DocumentV0>::validator("quire.document").untagged(|json| {
        DocumentV0::deserialize(json).ok()
    })
}

// =============================================================================
// Block contract
// =============================================================================

impl<B: Block> Block for DocumentBlock<B> {
    type State = DocumentState<B::State>;

    fn init(&self) -> Self::State {
        DocumentState::new(PageState::new(TEMPLATE_ID, "", self.page.init()))
    }

    fn recompute(
        &self,
        state: Self::State,
        dispatch: &Dispatcher<Self::State>,
        env: &Environment,
    ) -> Result<Recomputed<Self::State>> {
        let old = self.result(&state)?;
        let forest = forest_dispatcher(dispatch);
        let ctx = PagesCtx::new(&self.page, env, &forest);

        let mut doc = state;
        let pages = mem::take(&mut doc.pages);
        let update = recompute_pages_from(pages, None, BTreeSet::new(), &ctx);
        doc.pages = update.pages;

        let new = self.result(&doc)?;
        Ok(if new == old {
            Recomputed::unchanged(doc)
        } else {
            Recomputed::changed(doc)
        })
    }

    fn result(&self, state: &Self::State) -> Result<Value> {
        Ok(match state.open_page() {
            Some(page) => result_or_error(&self.page, &page.state),
            None => Value::Null,
        })
    }

    fn from_json(
        &self,
        json: &Json,
        dispatch: &Dispatcher<Self::State>,
        env: &Environment,
    ) -> Result<Self::State> {
        let DocumentV0 {
            pages,
            view_state,
            template,
        } = wire().load(json)?;

        let forest = forest_dispatcher(dispatch);
        let pages = self.load_pages(pages, &forest, env, &[])?;
        let template_state =
            self.page
                .from_json(&template.state, &template_dispatcher(dispatch), env)?;

        let mut doc = DocumentState::new(PageState {
            id: TEMPLATE_ID,
            name: template.name,
            state: template_state,
            collapsed: template.is_collapsed,
            children: Vec::new(),
        });
        doc.pages = pages;
        doc.view_state.sidebar_open = view_state.sidebar_open;
        doc.view_state.open_page = view_state.open_page;
        Ok(doc)
    }

    fn to_json(&self, state: &Self::State) -> Result<Json> {
        let doc = DocumentV0 {
            pages: self.save_pages(&state.pages)?,
            view_state: ViewStateV0 {
                sidebar_open: state.view_state.sidebar_open,
                open_page: state.view_state.open_page.clone(),
            },
            template: self.save_page(&state.template)?,
        };
        Ok(wire().save(&doc)?)
    }
}

// ==== Tests ============================================================
