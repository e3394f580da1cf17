//! Free-text notes.

use quire_core::{Block, Dispatcher, Environment, Recomputed, Result, Value};
use quire_wire::Format;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// A block holding prose. It never computes anything: recomputation is a
/// no-op and the result is the text itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoteBlock;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NoteState {
    text: String,
}

impl NoteState {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Serialize, Deserialize)]
struct NoteV0 {
    text: String,
}

// Early documents stored a note as a bare JSON string.
fn wire() -> Format<NoteV0> {
    Format::<NoteV0>::validator("quire.note").untagged(|json| {
        json.as_str().map(|text| NoteV0 {
            text: text.to_string(),
        })
    })
}

impl Block for NoteBlock {
    type State = NoteState;

    fn init(&self) -> NoteState {
        NoteState::default()
    }

    fn recompute(
        &self,
        state: NoteState,
        _dispatch: &Dispatcher<NoteState>,
        _env: &Environment,
    ) -> Result<Recomputed<NoteState>> {
        Ok(Recomputed::unchanged(state))
    }

    fn result(&self, state: &NoteState) -> Result<Value> {
        Ok(Value::text(state.text.as_str()))
    }

    fn from_json(
        &self,
        json: &Json,
        _dispatch: &Dispatcher<NoteState>,
        _env: &Environment,
    ) -> Result<NoteState> {
        let NoteV0 { text } = wire().load(json)?;
        Ok(NoteState { text })
    }

    fn to_json(&self, state: &NoteState) -> Result<Json> {
        Ok(wire().save(&NoteV0 {
            text: state.text.clone(),
        })?)
    }
}
