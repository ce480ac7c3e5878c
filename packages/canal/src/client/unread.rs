//! Operator-side unread tracking.
//!
//! Membership, not counting: a conversation is either in the set or not,
//! and the badge is the set's size. Ten messages in one neglected channel
//! light the badge exactly once.

use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct UnreadSet {
    members: HashSet<i64>,
    active: Option<i64>,
}

impl UnreadSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A message arrived for this conversation. Enters the set unless the
    /// reader is already looking at it. Returns true if the badge changed.
    pub fn note_message(&mut self, conversation_id: i64) -> bool {
        if self.active == Some(conversation_id) {
            return false;
        }
        self.members.insert(conversation_id)
    }

    /// The reader opened this conversation: it leaves the set and stays
    /// out while it remains active.
    pub fn activate(&mut self, conversation_id: i64) {
        self.active = Some(conversation_id);
        self.members.remove(&conversation_id);
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    /// Rebuild from server-side unread counts after a resync. The active
    /// conversation never re-enters.
    pub fn reseed(&mut self, unread: impl IntoIterator<Item = i64>) {
        self.members = unread
            .into_iter()
            .filter(|id| self.active != Some(*id))
            .collect();
    }

    pub fn badge_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, conversation_id: i64) -> bool {
        self.members.contains(&conversation_id)
    }
}

// =============================================================================
// Tests
// =============================================================================
