//! Revision-chained JSON wire format for quire blocks.
//!
//! Every persisted block type owns a chain of revisions. Each revision's JSON
//! is tagged `{ "t": "<namespace>.<type>", "v": <n>, ...payload }`; the
//! pre-tag legacy shape ("vPre") carries no tag and is matched structurally
//! as a last resort. Loading dispatches on the tag: the current revision
//! decodes directly, an older revision decodes with its own shape and is
//! upgraded forward step by step. Saving always emits the current revision.
//!
//! This crate is a pure leaf: it validates and upgrades JSON into the
//! current revision's *shape*. Turning a shape into live block state needs
//! runtime context (dispatch, environment) and happens above, in the block
//! implementations.
//!
//! # Example
//!
//! ```
//! use quire_wire::Format;
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//!
//! #[derive(Serialize, Deserialize)]
//! struct V0 { text: String }
//!
//! #[derive(Serialize, Deserialize)]
//! struct V1 { text: String, pinned: bool }
//!
//! let wire = Format::<V0>::validator("demo.note")
//!     .untagged(|json| json.as_str().map(|s| V0 { text: s.to_string() }))
//!     .revision(|old: V0| V1 { text: old.text, pinned: false });
//!
//! // A vPre document upgrades all the way forward.
//! let state = wire.load(&json!("hello")).unwrap();
//! assert!(!state.pinned);
//!
//! // Saving emits the current tag.
//! let saved = wire.save(&state).unwrap();
//! assert_eq!(saved["t"], "demo.note");
//! assert_eq!(saved["v"], 1);
//! ```

mod error;
mod format;

pub use error::{Result, WireError};
pub use format::Format;

use serde_json::Value as Json;

/// Reads the `{ "t": ..., "v": ... }` tag pair, if both fields are present.
pub fn read_tag(json: &Json) -> Option<(&str, u32)> {
    let obj = json.as_object()?;
    let t = obj.get("t")?.as_str()?;
    let v = obj.get("v")?.as_u64()?;
    Some((t, u32::try_from(v).ok()?))
}

/// One-line shape description for mismatch errors.
pub fn summarize(json: &Json) -> String {
    match json {
        Json::Null => "null".to_string(),
        Json::Bool(_) => "a bool".to_string(),
        Json::Number(_) => "a number".to_string(),
        Json::String(_) => "a string".to_string(),
        Json::Array(items) => format!("an array of {} items", items.len()),
        Json::Object(map) => {
            if let Some((t, v)) = read_tag(json) {
                format!("tag {t} v{v}")
            } else {
                let keys: Vec<&str> = map.keys().take(4).map(String::as_str).collect();
                format!("an object with keys {{{}}}", keys.join(", "))
            }
        }
    }
}
