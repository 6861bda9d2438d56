//! Pause/resume composition (spec §4.6).
//!
//! The source relies on weak references to let an unreferenced pause
//! identifier effectively unblock resume. Per the design notes this is
//! re-implemented as a table of caller-chosen opaque identity tokens: the
//! public API accepts a [`PauseId`] the caller is responsible for keeping
//! track of, rather than an object reference with a destructor hook.

use std::collections::HashSet;

use crate::record::target_key;

/// An opaque pause identity. Two handles pausing with the same `PauseId`
/// compose into one entry (set semantics); the channel does not care what a
/// `PauseId` "means".
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PauseId(String);

impl PauseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for PauseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity ingestion-driven pause/resume events are reported under
/// (spec §4.6: "`ingestionDidPause/Resume` use the ingestion instance as the
/// id").
pub fn ingestion_pause_id() -> PauseId {
    PauseId::new("__ingestion__")
}

/// Tracks both pause axes for a single Channel Unit: identifier-based
/// pausing and target-key pausing.
#[derive(Default, Debug, Clone)]
pub struct PauseRegistry {
    paused_by: HashSet<PauseId>,
    paused_target_keys: HashSet<String>,
}

impl PauseRegistry {
    pub fn is_paused_by_id(&self) -> bool {
        !self.paused_by.is_empty()
    }

    pub fn paused_target_keys(&self) -> &HashSet<String> {
        &self.paused_target_keys
    }

    /// Add `id` to the pause set. Returns `true` if this was a new entry
    /// (not idempotent no-op).
    pub fn pause(&mut self, id: PauseId) -> bool {
        self.paused_by.insert(id)
    }

    /// Remove `id` from the pause set. Returns `true` if it was present.
    /// An unknown identifier is a no-op per spec §4.6.
    pub fn resume(&mut self, id: &PauseId) -> bool {
        self.paused_by.remove(id)
    }

    /// Insert the target key derived from `token` (prefix up to first `-`).
    /// Returns `true` if the key was newly paused.
    pub fn pause_target(&mut self, token: &str) -> bool {
        self.paused_target_keys.insert(target_key(token))
    }

    /// Remove the target key derived from `token`. Returns `true` if it was
    /// paused.
    pub fn resume_target(&mut self, token: &str) -> bool {
        self.paused_target_keys.remove(&target_key(token))
    }
}
