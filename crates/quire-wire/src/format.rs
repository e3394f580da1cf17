//! The revision chain builder.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;

use crate::error::{Result, WireError};
use crate::{read_tag, summarize};

/// Decodes a tagged payload of one historic revision all the way to the
/// current shape `S` (upgrades already composed in).
type Decoder<S> = Arc<dyn Fn(&Json) -> std::result::Result<S, String> + Send + Sync>;

/// Structural decoder for the pre-tag legacy shape.
type Untagged<S> = Arc<dyn Fn(&Json) -> Option<S> + Send + Sync>;

/// A chain of revisions for one persisted type.
///
/// Built front to back: [`Format::validator`] declares revision 0, each
/// [`Format::revision`] call appends the next revision together with the
/// upgrade from its predecessor, and [`Format::untagged`] registers the
/// structural fallback for documents written before tagging existed.
///
/// The type parameter always tracks the *newest* shape; older shapes only
/// appear as upgrade-function inputs, so a finished chain can never hand
/// back a stale revision.
pub struct Format<S> {
    ty: &'static str,
    decoders: Vec<Decoder<S>>,
    untagged: Option<Untagged<S>>,
}

impl<S> Format<S>
where
    S: DeserializeOwned + 'static,
{
    /// Starts a chain at revision 0 with `S` as its shape.
    pub fn validator(ty: &'static str) -> Self {
        Self {
            ty,
            decoders: vec![serde_decoder::<S>()],
            untagged: None,
        }
    }

    /// Registers the structural decoder for untagged legacy JSON.
    ///
    /// Only consulted when the incoming JSON carries no `t`/`v` tag; return
    /// `None` to reject. Declared at the revision whose shape the legacy
    /// format maps onto (usually revision 0) — later upgrades apply to it
    /// like to any other old revision.
    pub fn untagged<F>(mut self, decode: F) -> Self
    where
        F: Fn(&Json) -> Option<S> + Send + Sync + 'static,
    {
        self.untagged = Some(Arc::new(decode));
        self
    }

    /// Appends the next revision, with `upgrade` mapping the previous shape
    /// forward. `New` becomes the chain's current shape.
    pub fn revision<New, U>(self, upgrade: U) -> Format<New>
    where
        New: DeserializeOwned + 'static,
        U: Fn(S) -> New + Send + Sync + 'static,
    {
        let upgrade = Arc::new(upgrade);

        let mut decoders: Vec<Decoder<New>> = self
            .decoders
            .into_iter()
            .map(|decode| {
                let upgrade = Arc::clone(&upgrade);
                let composed: Decoder<New> = Arc::new(move |json| decode(json).map(|old| upgrade(old)));
                composed
            })
            .collect();
        decoders.push(serde_decoder::<New>());

        let untagged = self.untagged.map(|decode| {
            let upgrade = Arc::clone(&upgrade);
            let composed: Untagged<New> = Arc::new(move |json| decode(json).map(|old| upgrade(old)));
            composed
        });

        Format {
            ty: self.ty,
            decoders,
            untagged,
        }
    }

    /// The tag name this chain owns.
    pub fn ty(&self) -> &'static str {
        self.ty
    }

    /// The current (newest) revision number.
    pub fn current(&self) -> u32 {
        (self.decoders.len() - 1) as u32
    }

    /// Decodes JSON of any known revision into the current shape.
    ///
    /// Tagged input dispatches on its revision number, newest shapes
    /// decoding directly and older ones upgrading forward. Untagged input
    /// falls back to the structural legacy decoder. Anything else fails
    /// with [`WireError::NoMatchingRevision`]; a recognized tag wrapping a
    /// bad payload fails with [`WireError::Malformed`].
    pub fn load(&self, json: &Json) -> Result<S> {
        if let Some((t, v)) = read_tag(json) {
            if t == self.ty {
                if let Some(decode) = self.decoders.get(v as usize) {
                    return decode(json).map_err(|detail| WireError::Malformed {
                        ty: self.ty.to_string(),
                        v,
                        detail,
                    });
                }
            }
            return Err(self.no_match(json));
        }

        if let Some(decode) = &self.untagged {
            if let Some(state) = decode(json) {
                return Ok(state);
            }
        }

        Err(self.no_match(json))
    }

    /// Encodes `state` as the current revision, tag included.
    pub fn save(&self, state: &S) -> Result<Json>
    where
        S: Serialize,
    {
        let mut json = serde_json::to_value(state).map_err(|e| WireError::Encode {
            ty: self.ty.to_string(),
            detail: e.to_string(),
        })?;
        let Json::Object(map) = &mut json else {
            return Err(WireError::Encode {
                ty: self.ty.to_string(),
                detail: "current revision must encode to an object".to_string(),
            });
        };
        map.insert("t".to_string(), Json::String(self.ty.to_string()));
        map.insert("v".to_string(), Json::from(self.current()));
        Ok(json)
    }

    fn no_match(&self, json: &Json) -> WireError {
        WireError::NoMatchingRevision {
            ty: self.ty.to_string(),
            found: summarize(json),
        }
    }
}

fn serde_decoder<T: DeserializeOwned>() -> Decoder<T> {
    Arc::new(|json| T::deserialize(json).map_err(|e| e.to_string()))
}
