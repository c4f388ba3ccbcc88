//! Process-lifetime record of message identifiers already handled.
//!
//! Append-only, memory-resident, no eviction. A restart forgets
//! everything, and synthesized identifiers are not stable across runs,
//! so suppression is best-effort beyond a single process lifetime.

use std::collections::HashSet;

/// Set of seen message identifiers.
#[derive(Debug, Default)]
pub struct SeenMessages {
    ids: HashSet<String>,
}

impl SeenMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_seen(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn mark_seen(&mut self, id: &str) {
        self.ids.insert(id.to_string());
    }

    /// Mark `id` seen, returning `true` only if it was not seen before.
    ///
    /// Check and insert happen in one step, so within a batch each
    /// identifier is admitted exactly once.
    pub fn first_sighting(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
