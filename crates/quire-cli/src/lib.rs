//! Everything the `quire` binary does, one function per concern, kept out of
//! `main.rs` so the file round-trips are testable without spawning a process.
//!
//! Each invocation is a full session over one document file: load the
//! revision chain, apply an edit through the same dispatch path a rendering
//! layer would use, then write the chain back. Errors the document absorbs
//! (bad code, broken references) stay *in* the document as error values;
//! errors about the invocation itself (missing files, bad paths) surface as
//! [`anyhow`] results.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use quire_core::block::result_or_error;
use quire_core::document::{add_page_at, delete_page_at, forest_dispatcher, set_page_name};
use quire_core::pages::{page_at, page_content_dispatcher};
use quire_core::{
    BlockTag, DocCtx, EntryId, HistoryMode, PagePath, PageState, PagesCtx, Session, Value,
    next_free_id,
};

use quire_blocks::sheet::{insert_line_after, set_line_name, update_line};
use quire_blocks::{
    AnyState, CalcRuntime, ChooserState, Library, SheetCtx, SheetState, StandardDocument,
    StandardDocumentState, StandardLine, StandardPage,
};

// =============================================================================
// Sessions and files
// =============================================================================

/// The standard block library over the built-in calculator.
pub fn standard_library() -> Library {
    Library::new(Arc::new(CalcRuntime))
}

/// Creates `file` holding a fresh, empty document.
pub fn create(library: &Library, file: &Path) -> Result<()> {
    if file.exists() {
        bail!("{} already exists", file.display());
    }
    let session = Session::new(
        library.standard_document(),
        library.standard_env(),
        library.reporter().clone(),
    );
    save(&session, file)
}

/// Loads `file` into a live session, recomputing every page.
pub fn open(library: &Library, file: &Path) -> Result<Session<StandardDocument>> {
    let text = fs::read_to_string(file)
        .with_context(|| format!("could not read {}", file.display()))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("{} does not hold JSON", file.display()))?;
    let session = Session::from_json(
        library.standard_document(),
        library.standard_env(),
        library.reporter().clone(),
        &json,
    )
    .with_context(|| format!("{} does not hold a document", file.display()))?;
    Ok(session)
}

/// Writes the session's revision chain back to `file`.
pub fn save(session: &Session<StandardDocument>, file: &Path) -> Result<()> {
    let json = session.to_json().context("could not serialize the document")?;
    let text = serde_json::to_string_pretty(&json)?;
    fs::write(file, text).with_context(|| format!("could not write {}", file.display()))
}

// =============================================================================
// Page paths
// =============================================================================

/// Parses a dotted page path like `0` or `0.2`.
pub fn parse_path(text: &str) -> Result<PagePath> {
    text.split('.')
        .map(|part| {
            part.parse::<i64>()
                .map(EntryId)
                .map_err(|_| anyhow::anyhow!("bad page path {text:?}; expected ids like 0 or 0.2"))
        })
        .collect()
}

/// The inverse of [`parse_path`].
pub fn format_path(path: &[EntryId]) -> String {
    path.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

// =============================================================================
// Edits
// =============================================================================

/// Applies a document operation through the document block's dispatch path.
fn edit_doc(
    session: &Session<StandardDocument>,
    op: impl FnOnce(StandardDocumentState, &DocCtx<'_, StandardPage>) -> StandardDocumentState
    + Send
    + 'static,
) {
    session
        .block()
        .inner()
        .edit(&session.dispatcher(), session.env(), op);
}

/// Applies a sheet operation to the page at `path`, in the environment that
/// page computes in.
fn edit_sheet(
    library: &Library,
    session: &Session<StandardDocument>,
    path: &[EntryId],
    op: impl FnOnce(SheetState<ChooserState>, &SheetCtx<'_, StandardLine>) -> SheetState<ChooserState>
    + Send
    + 'static,
) {
    let page = library.page_block();
    let forest = forest_dispatcher(&session.dispatcher());
    let ctx = PagesCtx::new(&page, session.env(), &forest);
    let content = page_content_dispatcher(&ctx, path);
    let line = library.line_block();
    let env = library.page_env(&session.shown(), path);
    let inner = content.clone();
    content.dispatch(move |sheet| {
        let ctx = SheetCtx::new(&line, &env, &inner);
        op(sheet, &ctx)
    });
}

/// Adds a page after the page at `after` (or at the end of the root level
/// when `after` is empty) and returns the new page's path.
pub fn add_page(session: &Session<StandardDocument>, after: &[EntryId]) -> Result<PagePath> {
    if !after.is_empty() && page_at(&session.shown().pages, after).is_none() {
        bail!("no page at {}", format_path(after));
    }
    let at = after.to_vec();
    edit_doc(session, move |doc, ctx| add_page_at(doc, &at, ctx));
    Ok(session.shown().view_state.open_page)
}

/// Deletes the page at `path` together with its nested pages.
pub fn delete_page(session: &Session<StandardDocument>, path: &[EntryId]) -> Result<()> {
    if page_at(&session.shown().pages, path).is_none() {
        bail!("no page at {}", format_path(path));
    }
    let at = path.to_vec();
    edit_doc(session, move |doc, ctx| delete_page_at(doc, &at, ctx));
    Ok(())
}

/// Renames the page at `path`, rebinding any cross-page references.
pub fn rename_page(
    session: &Session<StandardDocument>,
    path: &[EntryId],
    name: String,
) -> Result<()> {
    if page_at(&session.shown().pages, path).is_none() {
        bail!("no page at {}", format_path(path));
    }
    let at = path.to_vec();
    edit_doc(session, move |doc, ctx| set_page_name(doc, &at, name, ctx));
    Ok(())
}

/// Sets a line's code on the page at `page` and returns the page's result.
///
/// With no explicit line this types into the page's trailing empty line, the
/// one every fresh page and every insertion leaves behind, appending a new
/// line when the last one already holds something.
pub fn set_line(
    library: &Library,
    session: &Session<StandardDocument>,
    page: &[EntryId],
    line: Option<EntryId>,
    name: Option<String>,
    code: String,
) -> Result<Value> {
    let doc = session.shown();
    let Some(target) = page_at(&doc.pages, page) else {
        bail!("no page at {}", format_path(page));
    };
    let id = match line {
        Some(id) => {
            if !target.state.lines.iter().any(|line| line.id == id) {
                bail!("page {} has no line {id}", format_path(page));
            }
            id
        }
        None => match target.state.lines.last() {
            Some(last) if last.state.expr().is_empty() => last.id,
            last => {
                let after = last.map(|line| line.id);
                let id = next_free_id(target.state.lines.iter().map(|line| line.id));
                edit_sheet(library, session, page, move |sheet, ctx| {
                    insert_line_after(sheet, after, ctx)
                });
                id
            }
        },
    };

    // The two-step edit a UI makes: choose the code block, then type into it.
    edit_sheet(library, session, page, move |sheet, ctx| {
        update_line(sheet, id, |state| state.with_expr("blocks.code"), ctx)
    });
    edit_sheet(library, session, page, move |sheet, ctx| {
        update_line(
            sheet,
            id,
            move |state| {
                state.map_inner(&BlockTag::new("code"), move |inner| match inner {
                    AnyState::Code(state) => AnyState::Code(state.with_code(code)),
                    other => other,
                })
            },
            ctx,
        )
    });
    if let Some(name) = name {
        edit_sheet(library, session, page, move |sheet, ctx| {
            set_line_name(sheet, id, name, ctx)
        });
    }
    page_result(library, &session.shown(), page)
}

// =============================================================================
// Inspection
// =============================================================================

/// The computed result of the page at `path`.
pub fn page_result(
    library: &Library,
    doc: &StandardDocumentState,
    path: &[EntryId],
) -> Result<Value> {
    match page_at(&doc.pages, path) {
        Some(page) => Ok(result_or_error(&library.page_block(), &page.state)),
        None => bail!("no page at {}", format_path(path)),
    }
}

/// One line per page, depth first: path, exposed name, result.
pub fn page_listing(library: &Library, doc: &StandardDocumentState) -> Vec<String> {
    fn walk(
        library: &Library,
        pages: &[PageState<SheetState<ChooserState>>],
        prefix: &mut PagePath,
        out: &mut Vec<String>,
    ) {
        for page in pages {
            prefix.push(page.id);
            let value = result_or_error(&library.page_block(), &page.state);
            out.push(format!(
                "{}  {}  {value}",
                format_path(prefix),
                page.exposed_name()
            ));
            walk(library, &page.children, prefix, out);
            prefix.pop();
        }
    }
    let mut out = Vec::new();
    walk(library, &doc.pages, &mut PagePath::new(), &mut out);
    out
}

// =============================================================================
// History
// =============================================================================

/// Steps the view back `steps` snapshots without touching the file, and
/// returns the viewed position with its result.
pub fn back(session: &Session<StandardDocument>, steps: usize) -> Result<(usize, Value)> {
    if session.timeline().is_empty() {
        bail!("the timeline is empty");
    }
    for _ in 0..steps.max(1) {
        session.go_back();
    }
    let HistoryMode::Viewing { position } = session.history_mode() else {
        bail!("the timeline is empty");
    };
    Ok((position, session.result()))
}

/// Makes snapshot `position` the current state again, appending it to the
/// timeline rather than rewriting what came after.
pub fn restore(session: &Session<StandardDocument>, position: usize) -> Result<()> {
    let len = session.timeline().len();
    if position >= len {
        bail!("no snapshot {position}; the timeline has {len} entries");
    }
    session.open_history();
    for _ in 0..len - 1 - position {
        session.go_back();
    }
    session.use_this_state();
    Ok(())
}
