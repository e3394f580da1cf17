//! Block contract, recomputation engines, history, and session reducer.
//!
//! Quire documents are trees of *blocks*: self-contained units of state and
//! computation that read each other's results by name. This crate is the
//! engine room that makes them composable:
//!
//! - [`Block`] — the capability table every variant satisfies, plus
//!   [`SafeBlock`], the decorator that keeps one broken block from taking
//!   the document down with it.
//! - [`entry`] — ordered sibling lists with prefix-stable, left-to-right
//!   incremental recomputation.
//! - [`pages`] / [`document`] — the hierarchical generalization: a page
//!   forest with path-addressed structural edits and lexically scoped
//!   name resolution.
//! - [`history`] — the outermost time-travel wrapper with
//!   exponential-decay compaction.
//! - [`session`] — the single serial reducer that applies dispatched
//!   actions, snapshots history, and contains panics.
//!
//! # Layering
//!
//! ```text
//! Session (serial reducer, panic containment, timestamps)
//!     └── History<State> (snapshot log, current vs. viewing)
//!         └── outermost Block (usually a page-tree document)
//!             └── pages engine → entry engine → leaf blocks
//! ```
//!
//! Everything below the session is pure data-in data-out: actions are
//! `State -> State` closures, recomputation returns fresh trees sharing
//! unchanged subtrees with their inputs, and failures travel as values.

pub mod block;
pub mod dispatch;
pub mod document;
pub mod entry;
pub mod env;
pub mod history;
pub mod pages;
pub mod report;
pub mod session;
pub mod value;

pub use block::{Block, BlockError, Recomputed, Result, SafeBlock};
pub use dispatch::{Action, Dispatcher};
pub use document::{DocCtx, DocumentState, TEMPLATE_ID, ViewState};
pub use entry::{Entry, EntryId, next_free_id};
pub use env::{BEFORE, Environment};
pub use history::{History, HistoryEntry, HistoryMode};
pub use pages::{PagePath, PageState, PagesCtx};
pub use report::{Report, Reporter};
pub use session::{Session, SessionId};
pub use value::{BlockTag, Value};

/// Milliseconds since the epoch, for history timestamps.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
