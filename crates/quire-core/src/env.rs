//! Name → value scopes threaded through recomputation.

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::value::Value;

/// Reserved binding holding the preceding-sibling map as one record, so a
/// block can inspect the scope it sits in (or reach a name its own binding
/// shadows).
pub const BEFORE: &str = "$before";

/// An immutable mapping from name to computed value.
///
/// Environments compose by layering: global library bindings first, then
/// each preceding sibling's exposed result, then [`BEFORE`]. Later layers
/// shadow earlier ones by name. All methods return fresh environments;
/// scopes are small, so the copies stay cheap while the values inside them
/// share structure.
///
/// Alongside the bindings rides the *changed set*: the names whose values
/// changed in the propagation wave currently underway. Blocks compare it
/// against the names they actually read to decide whether to redo their
/// computation or keep the one they have.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Environment {
    bindings: IndexMap<String, Value>,
    changed: BTreeSet<String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bindings(bindings: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            bindings: bindings.into_iter().collect(),
            changed: BTreeSet::new(),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// A new environment with `name` bound, shadowing any existing binding.
    pub fn bind(&self, name: impl Into<String>, value: Value) -> Self {
        let mut bindings = self.bindings.clone();
        bindings.insert(name.into(), value);
        Self {
            bindings,
            changed: self.changed.clone(),
        }
    }

    /// A new environment with every pair bound, in iteration order.
    pub fn extend(&self, pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        let mut bindings = self.bindings.clone();
        for (name, value) in pairs {
            bindings.insert(name, value);
        }
        Self {
            bindings,
            changed: self.changed.clone(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    // =========================================================================
    // Changed-set threading
    // =========================================================================

    pub fn changed(&self) -> &BTreeSet<String> {
        &self.changed
    }

    pub fn is_changed(&self, name: &str) -> bool {
        self.changed.contains(name)
    }

    /// True when any of `reads` names a value that changed this wave.
    pub fn any_changed<'a>(&self, reads: impl IntoIterator<Item = &'a String>) -> bool {
        reads.into_iter().any(|name| self.changed.contains(name))
    }

    /// A new environment carrying exactly this changed set.
    pub fn with_changed(&self, changed: BTreeSet<String>) -> Self {
        Self {
            bindings: self.bindings.clone(),
            changed,
        }
    }

    /// A new environment with an empty changed set.
    pub fn without_changes(&self) -> Self {
        self.with_changed(BTreeSet::new())
    }
}
