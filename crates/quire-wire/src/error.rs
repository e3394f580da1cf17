//! Wire error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WireError>;

/// Failure while loading or saving a versioned JSON document.
///
/// Carries strings rather than source errors so it stays `Clone + Eq` and
/// can flow through block results as plain data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// The tag matched a known revision but its payload did not decode.
    #[error("malformed {ty} v{v}: {detail}")]
    Malformed { ty: String, v: u32, detail: String },

    /// No revision in the chain matched the incoming JSON.
    #[error("no revision of {ty} matches {found}")]
    NoMatchingRevision { ty: String, found: String },

    /// The current revision's state failed to encode.
    #[error("could not encode {ty}: {detail}")]
    Encode { ty: String, detail: String },
}
