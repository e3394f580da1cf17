//! Concrete block variants over the `quire-core` contract.
//!
//! `quire-core` defines what a block is and how trees of them recompute;
//! this crate supplies the blocks people actually write in:
//!
//! - [`code`]: expressions evaluated by a pluggable [`runtime::Runtime`],
//!   synchronously or not, with last-evaluation-wins settling.
//! - [`note`]: plain prose.
//! - [`sheet`]: vertical lists of named lines, each line seeing everything
//!   above it.
//! - [`chooser`]: a block whose kind is itself the result of an expression.
//! - [`document`]: the page forest behind the block contract.
//!
//! [`library::Library`] ties them together: it knows every choosable
//! variant, owns the runtime and the error reporter, and assembles the
//! standard tower (a document of sheets of safe choosers). [`calc`] is the
//! built-in synchronous runtime; anything richer implements
//! [`runtime::Runtime`] and plugs in at [`library::Library::new`].

pub mod any;
pub mod calc;
pub mod chooser;
pub mod code;
pub mod document;
pub mod library;
pub mod note;
pub mod runtime;
pub mod sheet;

pub use any::{AnyBlock, AnyState};
pub use calc::CalcRuntime;
pub use chooser::{Choice, ChooserBlock, ChooserState};
pub use code::{CodeBlock, CodeState};
pub use document::DocumentBlock;
pub use library::{
    Library, StandardDocument, StandardDocumentState, StandardLine, StandardPage,
};
pub use note::{NoteBlock, NoteState};
pub use runtime::{CancelHandle, Eval, Runtime, Settle};
pub use sheet::{LineVisibility, LineWidth, SheetBlock, SheetCtx, SheetLine, SheetState};
