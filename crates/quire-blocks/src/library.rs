//! The block library: what can be chosen, and the standard assembly.
//!
//! A [`Library`] is the one place that knows every choosable variant. It
//! carries the runtime code blocks evaluate with and the reporter every
//! safe wrapper shares, so a whole document's plumbing is two `Arc`s.

use std::sync::Arc;

use indexmap::IndexMap;
use quire_core::block::result_or_error;
use quire_core::{
    BEFORE, Block, BlockTag, DocumentState, EntryId, Environment, PageState, Reporter, SafeBlock,
    Value,
};

use crate::any::AnyBlock;
use crate::chooser::{ChooserBlock, ChooserState};
use crate::code::CodeBlock;
use crate::document::DocumentBlock;
use crate::note::NoteBlock;
use crate::runtime::Runtime;
use crate::sheet::{SheetBlock, SheetState};

/// The standard line: a chooser kept safe, so one broken line never takes
/// down its sheet.
pub type StandardLine = SafeBlock<ChooserBlock>;

/// The standard page content: a sheet of safe choosers.
pub type StandardPage = SafeBlock<SheetBlock<StandardLine>>;

/// The standard tower: a document of pages, each page a sheet, each line a
/// safe chooser.
pub type StandardDocument = SafeBlock<DocumentBlock<StandardPage>>;

/// The state the standard tower computes over.
pub type StandardDocumentState = DocumentState<SheetState<ChooserState>>;

const TAGS: [&str; 3] = ["code", "note", "sheet"];

struct Shared {
    runtime: Arc<dyn Runtime>,
    reporter: Reporter,
}

#[derive(Clone)]
pub struct Library {
    shared: Arc<Shared>,
}

impl Library {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self::with_reporter(runtime, Reporter::new())
    }

    pub fn with_reporter(runtime: Arc<dyn Runtime>, reporter: Reporter) -> Self {
        Self {
            shared: Arc::new(Shared { runtime, reporter }),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.shared.runtime
    }

    pub fn reporter(&self) -> &Reporter {
        &self.shared.reporter
    }

    /// Tags this library can instantiate, in menu order.
    pub fn tags(&self) -> Vec<BlockTag> {
        TAGS.iter().map(|tag| BlockTag::new(*tag)).collect()
    }

    /// Builds the block a tag names. `None` for tags from documents written
    /// against a richer library.
    pub fn instantiate(&self, tag: &BlockTag) -> Option<AnyBlock> {
        match tag.as_str() {
            "code" => Some(AnyBlock::Code(CodeBlock::new(Arc::clone(
                &self.shared.runtime,
            )))),
            "note" => Some(AnyBlock::Note(NoteBlock)),
            "sheet" => Some(AnyBlock::Sheet(SheetBlock::new(self.line_block()))),
            _ => None,
        }
    }

    pub fn line_block(&self) -> StandardLine {
        SafeBlock::new(
            ChooserBlock::new(self.clone()),
            self.shared.reporter.clone(),
        )
    }

    /// The root environment documents compute in: a `blocks` record naming
    /// each choosable variant, so a chooser expression reads `blocks.code`.
    pub fn standard_env(&self) -> Environment {
        let fields: IndexMap<String, Value> = TAGS
            .iter()
            .map(|tag| (tag.to_string(), Value::Block(BlockTag::new(*tag))))
            .collect();
        Environment::from_bindings([("blocks".to_string(), Value::record(fields))])
    }

    pub fn page_block(&self) -> StandardPage {
        SafeBlock::new(
            SheetBlock::new(self.line_block()),
            self.shared.reporter.clone(),
        )
    }

    pub fn standard_document(&self) -> StandardDocument {
        SafeBlock::new(
            DocumentBlock::new(self.page_block()),
            self.shared.reporter.clone(),
        )
    }

    /// Reconstructs the environment the content of the page at `path`
    /// computes in: library bindings, preceding sibling results at every
    /// level of the path, and the page's own children's results.
    ///
    /// Rendering layers capture this environment during the recompute walk;
    /// anything driving targeted edits from outside a walk (a command line,
    /// a test) rebuilds it from the document state instead.
    pub fn page_env(&self, doc: &StandardDocumentState, path: &[EntryId]) -> Environment {
        let page = self.page_block();
        let mut env = self.standard_env();
        let mut siblings: &[PageState<SheetState<ChooserState>>] = &doc.pages;
        let mut target = None;
        for id in path {
            let Some(index) = siblings.iter().position(|p| p.id == *id) else {
                return env.without_changes();
            };
            let before: IndexMap<String, Value> = siblings[..index]
                .iter()
                .map(|p| (p.exposed_name(), result_or_error(&page, &p.state)))
                .collect();
            env = env.extend(before.clone()).bind(BEFORE, Value::record(before));
            target = Some(&siblings[index]);
            siblings = &siblings[index].children;
        }
        if let Some(found) = target {
            let children: IndexMap<String, Value> = found
                .children
                .iter()
                .map(|p| (p.exposed_name(), result_or_error(&page, &p.state)))
                .collect();
            env = env.extend(children);
        }
        env.without_changes()
    }
}
