//! Time-travel wrapper around the outermost block state.
//!
//! The history is an append-only snapshot log plus a mode switch: in
//! [`HistoryMode::Current`] edits apply to `inner` and push a snapshot, in
//! [`HistoryMode::Viewing`] the document is a read-only view of one entry.
//! Restoring an old entry never truncates: the viewed state is appended as
//! a fresh current entry, so the detour itself stays on the record.
//!
//! Snapshots loaded from disk stay as raw JSON ([`HistoryEntry::Stored`])
//! until someone actually views them; materializing upgrades the entry in
//! place so the work happens at most once.

use std::mem;
use std::sync::Arc;

use serde_json::Value as Json;

/// One snapshot, either live or still waiting to be deserialized.
#[derive(Debug, Clone)]
pub enum HistoryEntry<S> {
    Saved { time: u64, state: S },
    Stored { time: u64, json: Arc<Json> },
}

impl<S> HistoryEntry<S> {
    /// Milliseconds since the epoch at which the snapshot was taken.
    pub fn time(&self) -> u64 {
        match self {
            Self::Saved { time, .. } | Self::Stored { time, .. } => *time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    Current,
    Viewing { position: usize },
}

/// Snapshot log plus the live state it wraps.
#[derive(Debug, Clone)]
pub struct History<S> {
    entries: Vec<HistoryEntry<S>>,
    mode: HistoryMode,
    inner: S,
}

impl<S: Clone> History<S> {
    pub fn new(inner: S) -> Self {
        Self {
            entries: Vec::new(),
            mode: HistoryMode::Current,
            inner,
        }
    }

    /// Rebuilds a history from persisted parts; always starts in
    /// [`HistoryMode::Current`].
    pub fn from_parts(entries: Vec<HistoryEntry<S>>, inner: S) -> Self {
        Self {
            entries,
            mode: HistoryMode::Current,
            inner,
        }
    }

    pub fn entries(&self) -> &[HistoryEntry<S>] {
        &self.entries
    }

    pub fn mode(&self) -> HistoryMode {
        self.mode
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // =========================================================================
    // Current mode
    // =========================================================================

    /// Replaces `inner` with `state` and snapshots it, then compacts.
    ///
    /// The newest entry mirrors `inner` after every commit; that is the
    /// invariant the viewing transitions rely on.
    pub fn commit(&mut self, state: S, time: u64) {
        self.inner = state.clone();
        self.entries.push(HistoryEntry::Saved { time, state });
        let entries = mem::take(&mut self.entries);
        self.entries = reduce_history(entries);
    }

    // =========================================================================
    // Viewing transitions
    // =========================================================================

    /// Enters viewing mode at the newest snapshot. Nothing to view means
    /// nothing happens.
    pub fn open(&mut self) {
        if self.mode == HistoryMode::Current && !self.entries.is_empty() {
            self.mode = HistoryMode::Viewing {
                position: self.entries.len() - 1,
            };
        }
    }

    /// Steps one snapshot older. From current mode this first opens the
    /// view; the newest entry is what is on screen already, so the first
    /// step back lands on the one before it.
    pub fn go_back(&mut self) {
        if self.mode == HistoryMode::Current {
            self.open();
        }
        if let HistoryMode::Viewing { position } = self.mode {
            self.mode = HistoryMode::Viewing {
                position: position.saturating_sub(1),
            };
        }
    }

    pub fn go_forward(&mut self) {
        if let HistoryMode::Viewing { position } = self.mode {
            self.mode = HistoryMode::Viewing {
                position: (position + 1).min(self.entries.len().saturating_sub(1)),
            };
        }
    }

    /// The state a viewer should see: the viewed snapshot while in viewing
    /// mode, `inner` otherwise. `None` means the viewed snapshot could not
    /// be deserialized.
    pub fn shown(&mut self, load: impl FnOnce(&Json) -> Option<S>) -> Option<&S> {
        match self.mode {
            HistoryMode::Current => Some(&self.inner),
            HistoryMode::Viewing { position } => self.materialize(position, load),
        }
    }

    /// Deserializes the entry at `position` if it is still raw JSON,
    /// caching the result in place.
    pub fn materialize(
        &mut self,
        position: usize,
        load: impl FnOnce(&Json) -> Option<S>,
    ) -> Option<&S> {
        if let Some(HistoryEntry::Stored { time, json }) = self.entries.get(position) {
            let state = load(json)?;
            let upgraded = HistoryEntry::Saved { time: *time, state };
            self.entries[position] = upgraded;
        }
        match self.entries.get(position)? {
            HistoryEntry::Saved { state, .. } => Some(state),
            HistoryEntry::Stored { .. } => None,
        }
    }

    /// Leaves viewing mode with the entry at `position` as the new basis.
    ///
    /// Restoring anything but the newest entry appends a copy of it, so
    /// the forward history survives instead of being truncated. Returns
    /// `false` when the entry cannot be materialized; the mode is left
    /// untouched in that case.
    pub fn restore(
        &mut self,
        position: usize,
        time: u64,
        load: impl FnOnce(&Json) -> Option<S>,
    ) -> bool {
        let latest = self.entries.len().saturating_sub(1);
        let Some(state) = self.materialize(position, load).cloned() else {
            return false;
        };
        self.mode = HistoryMode::Current;
        if position == latest {
            // Nothing moved; appending a twin of the newest entry would
            // only feed the compactor.
            self.inner = state;
        } else {
            self.commit(state, time);
        }
        true
    }

    /// `restore` at the currently viewed position; a no-op in current mode.
    pub fn use_this_state(&mut self, time: u64, load: impl FnOnce(&Json) -> Option<S>) -> bool {
        match self.mode {
            HistoryMode::Viewing { position } => self.restore(position, time, load),
            HistoryMode::Current => false,
        }
    }

    /// Same transition as [`Self::use_this_state`]; closing the history
    /// view adopts whatever was on screen.
    pub fn close(&mut self, time: u64, load: impl FnOnce(&Json) -> Option<S>) -> bool {
        self.use_this_state(time, load)
    }
}

// =============================================================================
// Compaction
// =============================================================================

/// Thins a snapshot log so entries get exponentially sparser with age.
///
/// Entry `i` survives iff the gap to its successor, in units of 100ms,
/// exceeds `(len - i)^2`; the newest entry always survives. Recent history
/// stays fine-grained while long-ago detail decays, which bounds memory
/// without ever leaving a gap right where the user is working.
pub fn reduce_history<S>(entries: Vec<HistoryEntry<S>>) -> Vec<HistoryEntry<S>> {
    let len = entries.len() as u64;
    let times: Vec<u64> = entries.iter().map(|e| e.time()).collect();
    entries
        .into_iter()
        .enumerate()
        .filter(|(i, _)| match times.get(i + 1) {
            None => true,
            Some(next) => {
                let age_rank = len - *i as u64;
                next.saturating_sub(times[*i]) / 100 > age_rank.pow(2)
            }
        })
        .map(|(_, entry)| entry)
        .collect()
}
