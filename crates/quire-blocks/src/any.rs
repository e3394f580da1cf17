//! The closed union of choosable block variants.
//!
//! Choosers host "some block" without knowing which; [`AnyBlock`] and
//! [`AnyState`] are that erasure as a plain enum pair. Every contract method
//! matches block against state, so a state that drifted to the wrong variant
//! surfaces as [`BlockError::StateMismatch`] instead of being reinterpreted.

use quire_core::{
    Action, Block, BlockError, Dispatcher, Environment, Recomputed, Result, SafeBlock, Value,
};
use serde_json::Value as Json;

use crate::chooser::{ChooserBlock, ChooserState};
use crate::code::{CodeBlock, CodeState};
use crate::note::{NoteBlock, NoteState};
use crate::sheet::{SheetBlock, SheetState};

#[derive(Clone, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AnyBlock {
    Code(CodeBlock),
    Note(NoteBlock),
    Sheet(SheetBlock<SafeBlock<ChooserBlock>>),
}

impl AnyBlock {
    /// The variant's tag string, matching the library's naming.
    pub fn tag(&self) -> &'static str {
        self.into()
    }
}

#[derive(Debug, Clone, PartialEq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum AnyState {
    Code(CodeState),
    Note(NoteState),
    Sheet(SheetState<ChooserState>),
}

impl AnyState {
    pub fn tag(&self) -> &'static str {
        self.into()
    }
}

fn mismatch(block: &AnyBlock, state: &AnyState) -> BlockError {
    BlockError::StateMismatch {
        expected: block.tag(),
        got: state.tag(),
    }
}

/// Narrows an [`AnyState`] dispatcher to one variant's state. An action that
/// arrives after the variant was replaced is dropped, never reinterpreted.
fn narrow<T: Send + 'static>(
    dispatch: &Dispatcher<AnyState>,
    split: fn(AnyState) -> std::result::Result<T, AnyState>,
    join: fn(T) -> AnyState,
) -> Dispatcher<T> {
    dispatch.contramap(move |action: Action<T>| {
        Box::new(move |any: AnyState| match split(any) {
            Ok(inner) => join(action(inner)),
            Err(kept) => {
                tracing::debug!(
                    variant = kept.tag(),
                    "dropping an action for a replaced block variant"
                );
                kept
            }
        })
    })
}

fn narrow_code(dispatch: &Dispatcher<AnyState>) -> Dispatcher<CodeState> {
    narrow(
        dispatch,
        |any| match any {
            AnyState::Code(inner) => Ok(inner),
            other => Err(other),
        },
        AnyState::Code,
    )
}

fn narrow_note(dispatch: &Dispatcher<AnyState>) -> Dispatcher<NoteState> {
    narrow(
        dispatch,
        |any| match any {
            AnyState::Note(inner) => Ok(inner),
            other => Err(other),
        },
        AnyState::Note,
    )
}

fn narrow_sheet(dispatch: &Dispatcher<AnyState>) -> Dispatcher<SheetState<ChooserState>> {
    narrow(
        dispatch,
        |any| match any {
            AnyState::Sheet(inner) => Ok(inner),
            other => Err(other),
        },
        AnyState::Sheet,
    )
}

impl Block for AnyBlock {
    type State = AnyState;

    fn init(&self) -> AnyState {
        match self {
            AnyBlock::Code(block) => AnyState::Code(block.init()),
            AnyBlock::Note(block) => AnyState::Note(block.init()),
            AnyBlock::Sheet(block) => AnyState::Sheet(block.init()),
        }
    }

    fn recompute(
        &self,
        state: AnyState,
        dispatch: &Dispatcher<AnyState>,
        env: &Environment,
    ) -> Result<Recomputed<AnyState>> {
        match (self, state) {
            (AnyBlock::Code(block), AnyState::Code(state)) => Ok(block
                .recompute(state, &narrow_code(dispatch), env)?
                .map(AnyState::Code)),
            (AnyBlock::Note(block), AnyState::Note(state)) => Ok(block
                .recompute(state, &narrow_note(dispatch), env)?
                .map(AnyState::Note)),
            (AnyBlock::Sheet(block), AnyState::Sheet(state)) => Ok(block
                .recompute(state, &narrow_sheet(dispatch), env)?
                .map(AnyState::Sheet)),
            (block, state) => Err(mismatch(block, &state)),
        }
    }

    fn result(&self, state: &AnyState) -> Result<Value> {
        match (self, state) {
            (AnyBlock::Code(block), AnyState::Code(state)) => block.result(state),
            (AnyBlock::Note(block), AnyState::Note(state)) => block.result(state),
            (AnyBlock::Sheet(block), AnyState::Sheet(state)) => block.result(state),
            (block, state) => Err(mismatch(block, state)),
        }
    }

    fn from_json(
        &self,
        json: &Json,
        dispatch: &Dispatcher<AnyState>,
        env: &Environment,
    ) -> Result<AnyState> {
        match self {
            AnyBlock::Code(block) => Ok(AnyState::Code(block.from_json(
                json,
                &narrow_code(dispatch),
                env,
            )?)),
            AnyBlock::Note(block) => Ok(AnyState::Note(block.from_json(
                json,
                &narrow_note(dispatch),
                env,
            )?)),
            AnyBlock::Sheet(block) => Ok(AnyState::Sheet(block.from_json(
                json,
                &narrow_sheet(dispatch),
                env,
            )?)),
        }
    }

    fn to_json(&self, state: &AnyState) -> Result<Json> {
        match (self, state) {
            (AnyBlock::Code(block), AnyState::Code(state)) => block.to_json(state),
            (AnyBlock::Note(block), AnyState::Note(state)) => block.to_json(state),
            (AnyBlock::Sheet(block), AnyState::Sheet(state)) => block.to_json(state),
            (block, state) => Err(mismatch(block, state)),
        }
    }
}
