//! One conversation as the reader sees it.
//!
//! Wraps the log with the presentation concerns the log itself must not
//! know about: the cleared-before watermark (clearing hides history, it
//! never deletes it), the scroll-to-bottom signal, and whether older pages
//! remain on the server.

use crate::models::{Message, MessageStatus, SenderType};

use super::log::{LogEntry, MessageLog};

#[derive(Debug)]
pub struct ConversationView {
    conversation_id: i64,
    log: MessageLog,
    /// Ids below this are hidden from rendering. They stay in the log so
    /// dedup keeps suppressing their pushes and resync copies.
    cleared_before: Option<i64>,
    scroll_pending: bool,
    has_more: bool,
}

impl ConversationView {
    pub fn new(conversation_id: i64, own_sender: SenderType) -> Self {
        Self {
            conversation_id,
            log: MessageLog::new(own_sender),
            cleared_before: None,
            scroll_pending: false,
            has_more: false,
        }
    }

    pub fn conversation_id(&self) -> i64 {
        self.conversation_id
    }

    /// Entries at or above the cleared watermark. Placeholders have no id
    /// yet and are always visible.
    pub fn visible(&self) -> Vec<&LogEntry> {
        self.log
            .entries()
            .iter()
            .filter(|e| match (self.cleared_before, e.message.id) {
                (Some(watermark), Some(id)) => id >= watermark,
                _ => true,
            })
            .collect()
    }

    /// Hide everything currently rendered. New messages still appear.
    pub fn clear(&mut self) {
        if let Some(latest) = self.log.latest_id() {
            self.cleared_before = Some(latest + 1);
        }
    }

    /// Reveal hidden history again.
    pub fn unclear(&mut self) {
        self.cleared_before = None;
    }

    pub fn ingest_remote(&mut self, message: Message) -> bool {
        let added = self.log.ingest_remote(message);
        if added {
            self.scroll_pending = true;
        }
        added
    }

    pub fn append_optimistic(&mut self, message: Message) -> u64 {
        self.scroll_pending = true;
        self.log.append_optimistic(message)
    }

    pub fn resolve_optimistic(&mut self, token: u64, canonical: Message) -> bool {
        self.log.resolve_optimistic(token, canonical)
    }

    pub fn reject_optimistic(&mut self, token: u64) -> bool {
        self.log.reject_optimistic(token)
    }

    pub fn apply_status(&mut self, message_id: i64, status: MessageStatus) -> bool {
        self.log.apply_status(message_id, status)
    }

    pub fn ingest_history(&mut self, messages: Vec<Message>) -> usize {
        self.log.ingest_history(messages)
    }

    pub fn ingest_older(&mut self, messages: Vec<Message>) -> usize {
        self.log.ingest_older(messages)
    }

    pub fn unacked(&self) -> Vec<i64> {
        self.log.unacked()
    }

    pub fn mark_acked(&mut self, message_id: i64) {
        self.log.mark_acked(message_id)
    }

    pub fn oldest_id(&self) -> Option<i64> {
        self.log.oldest_id()
    }

    /// Consume the scroll-to-bottom signal. Arms on send and on receive,
    /// reads back once.
    pub fn take_scroll(&mut self) -> bool {
        std::mem::take(&mut self.scroll_pending)
    }

    pub fn set_has_more(&mut self, has_more: bool) {
        self.has_more = has_more;
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

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

    #[test]
    fn clear_hides_history_without_forgetting_it() {
        let mut view = ConversationView::new(1, SenderType::Admin);
        view.ingest_history(vec![incoming(1, "a"), incoming(2, "b")]);
        view.clear();

        assert!(view.visible().is_empty());

        // A hidden id arriving again on resync must not resurface.
        assert_eq!(view.ingest_history(vec![incoming(1, "a"), incoming(2, "b")]), 0);
        assert!(view.visible().is_empty());

        // New traffic renders past the watermark.
        assert!(view.ingest_remote(incoming(3, "c")));
        let visible: Vec<_> = view.visible().iter().filter_map(|e| e.message.id).collect();
        assert_eq!(visible, vec![3]);

        view.unclear();
        assert_eq!(view.visible().len(), 3);
    }

    #[test]
    fn clear_on_an_empty_view_is_a_no_op() {
        let mut view = ConversationView::new(1, SenderType::Admin);
        view.clear();
        assert!(view.ingest_remote(incoming(1, "a")));
        assert_eq!(view.visible().len(), 1);
    }

    #[test]
    fn placeholders_stay_visible_after_clear() {
        let mut view = ConversationView::new(1, SenderType::Admin);
        view.ingest_history(vec![incoming(1, "a")]);
        view.append_optimistic(Message::new(1, SenderType::Admin, "mine".into()));
        view.clear();

        // The pending bubble has no id yet and survives the watermark.
        assert_eq!(view.visible().len(), 1);
        assert!(view.visible()[0].pending);
    }

    #[test]
    fn scroll_signal_arms_on_traffic_and_reads_once() {
        let mut view = ConversationView::new(1, SenderType::Admin);
        assert!(!view.take_scroll());

        view.ingest_remote(incoming(1, "a"));
        assert!(view.take_scroll());
        assert!(!view.take_scroll());

        view.append_optimistic(Message::new(1, SenderType::Admin, "mine".into()));
        assert!(view.take_scroll());

        // Duplicates do not re-arm it.
        view.ingest_remote(incoming(1, "a"));
        assert!(!view.take_scroll());
    }

    #[test]
    fn overlap_refreshes_status_without_rearming_scroll() {
        let mut view = ConversationView::new(1, SenderType::Admin);
        view.ingest_remote(incoming(1, "a"));
        view.take_scroll();

        let mut replay = incoming(1, "a");
        replay.status = MessageStatus::Delivered;
        assert!(!view.ingest_remote(replay));
        assert!(!view.take_scroll());
        assert_eq!(view.visible()[0].message.status, MessageStatus::Delivered);
    }
}
