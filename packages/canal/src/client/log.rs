//! Append-only message log for one conversation.
//!
//! The log is the client-side source of truth for what has been rendered.
//! Entries are never reordered once appended: optimistic sends claim their
//! slot immediately and are resolved in place, pushes and history pages
//! append or prepend around them. A rendered id is rendered forever:
//! duplicate pushes and resync overlap add nothing, but the status they
//! carry still folds into the rendered entry, so an indicator whose echo
//! frame was lost heals on the next overlap.

use std::collections::HashSet;

use crate::models::{Message, MessageStatus, SenderType};

/// One rendered bubble.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Correlation token for an optimistic send still awaiting its id.
    pub local_token: Option<u64>,
    pub message: Message,
    /// True until the optimistic send resolves or is rejected.
    pub pending: bool,
    /// True once our delivered ack for this message actually left the
    /// socket. Own messages never need acking and start true.
    pub acked: bool,
}

#[derive(Debug)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
    seen_ids: HashSet<i64>,
    next_token: u64,
    own_sender: SenderType,
}

impl MessageLog {
    pub fn new(own_sender: SenderType) -> Self {
        Self {
            entries: Vec::new(),
            seen_ids: HashSet::new(),
            next_token: 1,
            own_sender,
        }
    }

    /// Render a just-sent message before the relay has confirmed it.
    /// Returns the correlation token used to resolve or reject it later.
    pub fn append_optimistic(&mut self, message: Message) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.entries.push(LogEntry {
            local_token: Some(token),
            message,
            pending: true,
            acked: true,
        });
        token
    }

    /// Swap the canonical persisted message into the placeholder's slot.
    /// Returns false if the token is unknown (already rejected); the caller
    /// should fall back to [`ingest_remote`](Self::ingest_remote) so the
    /// confirmed message still renders.
    pub fn resolve_optimistic(&mut self, token: u64, canonical: Message) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.local_token == Some(token))
        else {
            return false;
        };
        if let Some(id) = canonical.id {
            self.seen_ids.insert(id);
        }
        entry.message = canonical;
        entry.local_token = None;
        entry.pending = false;
        true
    }

    /// Remove a placeholder whose create failed.
    pub fn reject_optimistic(&mut self, token: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.local_token != Some(token));
        self.entries.len() < before
    }

    /// Append a pushed message. Returns false if its id was already
    /// rendered; the duplicate's status still applies, so resync overlap
    /// refreshes indicators without re-rendering anything.
    pub fn ingest_remote(&mut self, message: Message) -> bool {
        let Some(id) = message.id else {
            return false;
        };
        if !self.seen_ids.insert(id) {
            self.apply_status(id, message.status);
            return false;
        }
        self.entries.push(LogEntry {
            local_token: None,
            message,
            pending: false,
            acked: false,
        });
        true
    }

    /// Append a history page (oldest first). Overlap with rendered ids
    /// adds nothing but carries the store's current status forward.
    /// Returns how many entries were added.
    pub fn ingest_history(&mut self, messages: Vec<Message>) -> usize {
        let mut added = 0;
        for message in messages {
            let Some(id) = message.id else { continue };
            if !self.seen_ids.insert(id) {
                self.apply_status(id, message.status);
                continue;
            }
            // History arrives already read or about to be swept by the
            // resync ack pass, so it never re-enters the unacked set.
            self.entries.push(LogEntry {
                local_token: None,
                message,
                pending: false,
                acked: true,
            });
            added += 1;
        }
        added
    }

    /// Prepend an older history page (oldest first) ahead of everything
    /// already rendered. Used when the reader scrolls back.
    pub fn ingest_older(&mut self, messages: Vec<Message>) -> usize {
        let mut fresh = Vec::new();
        for message in messages {
            let Some(id) = message.id else { continue };
            if !self.seen_ids.insert(id) {
                continue;
            }
            fresh.push(LogEntry {
                local_token: None,
                message,
                pending: false,
                acked: true,
            });
        }
        let added = fresh.len();
        self.entries.splice(0..0, fresh);
        added
    }

    /// Apply a status update if it moves the message forward. Stale and
    /// duplicate updates return false and change nothing.
    pub fn apply_status(&mut self, message_id: i64, status: MessageStatus) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.message.id == Some(message_id))
        else {
            return false;
        };
        if entry.message.status == status || !entry.message.status.allows(status) {
            return false;
        }
        entry.message.status = status;
        true
    }

    /// Counterpart messages rendered but not yet acknowledged, oldest first.
    pub fn unacked(&self) -> Vec<i64> {
        self.entries
            .iter()
            .filter(|e| !e.acked && e.message.sender_type != self.own_sender)
            .filter_map(|e| e.message.id)
            .collect()
    }

    pub fn mark_acked(&mut self, message_id: i64) {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.message.id == Some(message_id))
        {
            entry.acked = true;
        }
    }

    /// Highest rendered id, the clear watermark anchor.
    pub fn latest_id(&self) -> Option<i64> {
        self.seen_ids.iter().max().copied()
    }

    /// Lowest rendered id, the anchor for paging back and for the resync
    /// refetch window.
    pub fn oldest_id(&self) -> Option<i64> {
        self.seen_ids.iter().min().copied()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn own(content: &str) -> Message {
        Message::new(1, SenderType::Admin, content.to_string())
    }

    fn incoming(id: i64, content: &str) -> Message {
        Message {
            id: Some(id),
            conversation_id: 1,
            sender_type: SenderType::Psychologist,
            content: content.to_string(),
            created_at: Utc::now().timestamp(),
            status: MessageStatus::Sent,
        }
    }

    fn confirmed(id: i64, content: &str) -> Message {
        Message {
            id: Some(id),
            conversation_id: 1,
            sender_type: SenderType::Admin,
            content: content.to_string(),
            created_at: Utc::now().timestamp(),
            status: MessageStatus::Sent,
        }
    }

    // ── optimistic lifecycle ─────────────────────────────────────────────

    #[test]
    fn optimistic_send_resolves_in_place_as_one_bubble() {
        let mut log = MessageLog::new(SenderType::Admin);
        log.ingest_remote(incoming(1, "hi"));
        let token = log.append_optimistic(own("hello"));
        log.ingest_remote(incoming(2, "more"));

        assert!(log.resolve_optimistic(token, confirmed(3, "hello")));

        // Still three bubbles, placeholder kept its visual slot.
        assert_eq!(log.len(), 3);
        assert_eq!(log.entries()[1].message.id, Some(3));
        assert!(!log.entries()[1].pending);
        assert!(log.entries()[1].local_token.is_none());

        // The canonical id now dedups any echo of the same message.
        assert!(!log.ingest_remote(confirmed(3, "hello")));
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn rejecting_an_optimistic_send_removes_the_placeholder() {
        let mut log = MessageLog::new(SenderType::Admin);
        let token = log.append_optimistic(own("doomed"));
        assert_eq!(log.len(), 1);

        assert!(log.reject_optimistic(token));
        assert!(log.is_empty());
        // Second rejection is a no-op.
        assert!(!log.reject_optimistic(token));
    }

    #[test]
    fn resolving_an_unknown_token_reports_failure() {
        let mut log = MessageLog::new(SenderType::Admin);
        assert!(!log.resolve_optimistic(99, confirmed(1, "hello")));
        // Fallback path: the confirmed message can still be rendered.
        assert!(log.ingest_remote(confirmed(1, "hello")));
    }

    // ── dedup and ordering ───────────────────────────────────────────────

    #[test]
    fn duplicate_push_renders_once() {
        let mut log = MessageLog::new(SenderType::Admin);
        assert!(log.ingest_remote(incoming(7, "hi")));
        assert!(!log.ingest_remote(incoming(7, "hi")));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn history_merge_skips_rendered_ids_and_prepends_older_pages() {
        let mut log = MessageLog::new(SenderType::Admin);
        log.ingest_remote(incoming(5, "five"));
        log.ingest_remote(incoming(6, "six"));

        // Tail fetch overlaps with what the push already rendered.
        assert_eq!(
            log.ingest_history(vec![incoming(5, "five"), incoming(6, "six"), incoming(7, "seven")]),
            1
        );
        assert_eq!(log.len(), 3);

        // Older page lands ahead of everything, oldest first.
        assert_eq!(log.ingest_older(vec![incoming(2, "two"), incoming(3, "three")]), 2);
        let ids: Vec<_> = log.entries().iter().filter_map(|e| e.message.id).collect();
        assert_eq!(ids, vec![2, 3, 5, 6, 7]);
    }

    #[test]
    fn latest_and_oldest_track_the_rendered_window() {
        let mut log = MessageLog::new(SenderType::Admin);
        assert_eq!(log.latest_id(), None);
        log.ingest_remote(incoming(4, "a"));
        log.ingest_remote(incoming(9, "b"));
        log.ingest_older(vec![incoming(2, "c")]);
        assert_eq!(log.latest_id(), Some(9));
        assert_eq!(log.oldest_id(), Some(2));
    }

    // ── status ordering ──────────────────────────────────────────────────

    #[test]
    fn status_never_regresses() {
        let mut log = MessageLog::new(SenderType::Admin);
        let token = log.append_optimistic(own("hello"));
        log.resolve_optimistic(token, confirmed(1, "hello"));

        assert!(log.apply_status(1, MessageStatus::Read));
        // A late delivered update arrives out of order and is discarded.
        assert!(!log.apply_status(1, MessageStatus::Delivered));
        assert_eq!(log.entries()[0].message.status, MessageStatus::Read);
    }

    #[test]
    fn duplicate_status_updates_are_dropped() {
        let mut log = MessageLog::new(SenderType::Admin);
        let token = log.append_optimistic(own("x"));
        log.resolve_optimistic(token, confirmed(1, "x"));
        assert!(log.apply_status(1, MessageStatus::Delivered));
        assert!(!log.apply_status(1, MessageStatus::Delivered));
    }

    #[test]
    fn status_for_an_unrendered_id_is_ignored() {
        let mut log = MessageLog::new(SenderType::Admin);
        assert!(!log.apply_status(42, MessageStatus::Delivered));
    }

    #[test]
    fn resync_overlap_advances_a_stale_indicator() {
        let mut log = MessageLog::new(SenderType::Admin);
        log.ingest_remote(incoming(1, "oi"));

        // The read echo was lost; the refetched copy carries the truth.
        let mut replay = incoming(1, "oi");
        replay.status = MessageStatus::Read;
        assert!(!log.ingest_remote(replay));
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].message.status, MessageStatus::Read);
    }

    #[test]
    fn overlapping_history_refreshes_rendered_statuses() {
        let mut log = MessageLog::new(SenderType::Admin);
        let token = log.append_optimistic(own("hello"));
        log.resolve_optimistic(token, confirmed(1, "hello"));

        let mut replay = confirmed(1, "hello");
        replay.status = MessageStatus::Read;
        assert_eq!(log.ingest_history(vec![replay]), 0);
        assert_eq!(log.entries()[0].message.status, MessageStatus::Read);
    }

    #[test]
    fn duplicate_push_cannot_regress_a_status() {
        let mut log = MessageLog::new(SenderType::Admin);
        let mut first = incoming(2, "oi");
        first.status = MessageStatus::Read;
        log.ingest_remote(first);

        // A replayed copy still at sent must not walk the indicator back.
        assert!(!log.ingest_remote(incoming(2, "oi")));
        assert_eq!(log.entries()[0].message.status, MessageStatus::Read);
    }

    // ── ack bookkeeping ──────────────────────────────────────────────────

    #[test]
    fn unacked_lists_only_counterpart_messages() {
        let mut log = MessageLog::new(SenderType::Admin);
        let token = log.append_optimistic(own("mine"));
        log.resolve_optimistic(token, confirmed(1, "mine"));
        log.ingest_remote(incoming(2, "theirs"));
        log.ingest_remote(incoming(3, "theirs too"));

        assert_eq!(log.unacked(), vec![2, 3]);

        log.mark_acked(2);
        assert_eq!(log.unacked(), vec![3]);
    }
}
