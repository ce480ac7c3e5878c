//! Client-side session state.
//!
//! One `ChannelSession` owns everything a frontend needs: the REST client,
//! the realtime connection, the per-conversation views, the unread set, and
//! the foreground flag. Frontends feed it events from a subscription and
//! read rendering state back out; all ordering, dedup, acknowledgement and
//! resync rules live here, not in the UI.
//!
//! Resync is one idempotent routine. It runs when the link (re)connects and
//! when the page returns to the foreground, and the degraded-link poller
//! calls the same routine. Running it twice in a row changes nothing.

use std::collections::HashMap;

use tracing::debug;

use crate::error::ChannelError;
use crate::models::{ChannelIdentity, Message, SenderType};
use crate::ws::ClientMessage;

use super::api::ApiClient;
use super::connection::{Connection, LinkState};
use super::events::{ChannelEvent, EventStream, EventSubscription};
use super::unread::UnreadSet;
use super::view::ConversationView;

pub struct ChannelSession {
    api: ApiClient,
    events: EventStream,
    connection: Option<Connection>,
    views: HashMap<i64, ConversationView>,
    /// Conversation the reader currently has open.
    active: Option<i64>,
    /// False while the page/terminal is hidden. Read receipts only flow
    /// while the reader can actually see the conversation.
    foreground: bool,
    unread: UnreadSet,
    page_size: i64,
}

impl ChannelSession {
    pub fn new(api: ApiClient, page_size: i64) -> Self {
        Self {
            api,
            events: EventStream::default(),
            connection: None,
            views: HashMap::new(),
            active: None,
            foreground: true,
            unread: UnreadSet::new(),
            page_size,
        }
    }

    pub fn identity(&self) -> ChannelIdentity {
        self.api.identity()
    }

    fn own_sender(&self) -> SenderType {
        self.api.identity().sender_type()
    }

    /// Subscribe to the event stream this session's connection feeds.
    pub fn subscribe(&self) -> EventSubscription {
        self.events.subscribe()
    }

    /// Open the realtime link, replacing any prior connection. History
    /// seeding happens when the `Connected` event comes back through
    /// [`handle_event`](Self::handle_event), so first connect and
    /// reconnect take the same path.
    pub async fn connect(&mut self) -> Result<(), ChannelError> {
        if let Some(prior) = self.connection.take() {
            prior.close();
        }
        let connection = Connection::open(self.api.ws_url(), self.events.clone()).await?;
        self.connection = Some(connection);
        Ok(())
    }

    /// Apply one event from the subscription to the session state.
    pub async fn handle_event(&mut self, event: ChannelEvent) -> Result<(), ChannelError> {
        match event {
            ChannelEvent::Connected { .. } => self.resync().await,
            ChannelEvent::MessageReceived(message) => {
                self.ingest_incoming(message);
                Ok(())
            }
            ChannelEvent::StatusUpdated { message_id, status } => {
                // Ids are global, so at most one view renders this message.
                // Unknown and stale updates fall through silently.
                for view in self.views.values_mut() {
                    if view.apply_status(message_id, status) {
                        break;
                    }
                }
                Ok(())
            }
            ChannelEvent::LinkDown { reason } => {
                debug!("Realtime link down: {}", reason);
                Ok(())
            }
            ChannelEvent::Superseded => {
                if let Some(connection) = self.connection.take() {
                    connection.close();
                }
                Err(ChannelError::Superseded)
            }
        }
    }

    /// Render a message that arrived outside our own send path, badge it
    /// if nobody is looking, and acknowledge it if somebody is.
    fn ingest_incoming(&mut self, message: Message) {
        let conversation_id = message.conversation_id;
        let sender = message.sender_type;
        let added = match self.views.get_mut(&conversation_id) {
            Some(view) => view.ingest_remote(message),
            // No view yet: nothing to render, but it is still news.
            None => true,
        };
        if !added || sender == self.own_sender() {
            return;
        }
        if self.api.identity() == ChannelIdentity::Admin {
            self.unread.note_message(conversation_id);
        }
        self.ack_pass(conversation_id);
    }

    /// Emit delivery and read acknowledgements for a conversation the
    /// reader is actively looking at. A no-op otherwise. Acks are
    /// fire-and-forget: a frame that does not leave stays unacked and the
    /// next pass picks it up, and the conversation-scoped read sweep
    /// repairs anything a lost frame missed.
    fn ack_pass(&mut self, conversation_id: i64) {
        if !self.foreground || self.active != Some(conversation_id) {
            return;
        }
        let Some(connection) = &self.connection else {
            return;
        };
        let Some(view) = self.views.get_mut(&conversation_id) else {
            return;
        };
        for message_id in view.unacked() {
            if connection.send_ack(ClientMessage::MessageDelivered { message_id }) {
                view.mark_acked(message_id);
            }
        }
        let _ = connection.send_ack(ClientMessage::MessagesRead { conversation_id });
    }

    /// Open a conversation: seed its history on first open, mark it
    /// active, drop it from the unread set, and acknowledge what is on
    /// screen.
    pub async fn open_conversation(&mut self, conversation_id: i64) -> Result<(), ChannelError> {
        if !self.views.contains_key(&conversation_id) {
            let page = self
                .api
                .fetch_history(conversation_id, None, Some(self.page_size))
                .await?;
            let mut view = ConversationView::new(conversation_id, self.own_sender());
            view.set_has_more(page.has_more);
            view.ingest_history(page.messages);
            self.views.insert(conversation_id, view);
        }
        self.active = Some(conversation_id);
        self.unread.activate(conversation_id);
        self.ack_pass(conversation_id);
        Ok(())
    }

    /// Leave the active conversation without tearing the session down.
    pub fn close_conversation(&mut self) {
        self.active = None;
        self.unread.deactivate();
    }

    /// Reconcile every rendered view against the store. Safe to run any
    /// number of times; rendered ids dedup whatever overlaps, and overlap
    /// carries the store's statuses onto what is already on screen.
    pub async fn resync(&mut self) -> Result<(), ChannelError> {
        // Acknowledgements depend only on rendered state, so they go out
        // before the fetches and still flow when the store is unreachable.
        if let Some(active) = self.active {
            self.ack_pass(active);
        }
        let ids: Vec<i64> = self.views.keys().copied().collect();
        for conversation_id in ids {
            self.resync_conversation(conversation_id).await?;
        }
        if self.api.identity() == ChannelIdentity::Admin {
            self.reseed_unread().await?;
        }
        if let Some(active) = self.active {
            self.ack_pass(active);
        }
        Ok(())
    }

    async fn resync_conversation(&mut self, conversation_id: i64) -> Result<(), ChannelError> {
        let anchor = self
            .views
            .get(&conversation_id)
            .and_then(|view| view.oldest_id());
        match anchor {
            Some(oldest) => {
                // Refetch from the rendered window onward: overlap heals
                // indicators whose echo frames never arrived, anything
                // above the high-water mark renders as missed traffic.
                let missed = self.api.fetch_after(conversation_id, oldest - 1).await?;
                for message in missed {
                    self.ingest_incoming(message);
                }
            }
            None => {
                let page = self
                    .api
                    .fetch_history(conversation_id, None, Some(self.page_size))
                    .await?;
                if let Some(view) = self.views.get_mut(&conversation_id) {
                    view.set_has_more(page.has_more);
                    view.ingest_history(page.messages);
                }
            }
        }
        Ok(())
    }

    async fn reseed_unread(&mut self) -> Result<(), ChannelError> {
        let summaries = self.api.list_conversations().await?;
        self.unread.reseed(
            summaries
                .into_iter()
                .filter(|s| s.unread_count > 0)
                .map(|s| s.id),
        );
        Ok(())
    }

    /// Send a message: render the placeholder immediately, persist, then
    /// resolve the placeholder into the canonical message. On failure the
    /// placeholder is removed and the error is returned for the retry
    /// affordance.
    pub async fn send_message(
        &mut self,
        conversation_id: i64,
        content: String,
    ) -> Result<Message, ChannelError> {
        let own_sender = self.own_sender();
        let token = {
            let view = self
                .views
                .entry(conversation_id)
                .or_insert_with(|| ConversationView::new(conversation_id, own_sender));
            view.append_optimistic(Message::new(conversation_id, own_sender, content.clone()))
        };

        match self.api.create_message(conversation_id, &content).await {
            Ok(canonical) => {
                if let Some(view) = self.views.get_mut(&conversation_id) {
                    if !view.resolve_optimistic(token, canonical.clone()) {
                        view.ingest_remote(canonical.clone());
                    }
                }
                Ok(canonical)
            }
            Err(e) => {
                if let Some(view) = self.views.get_mut(&conversation_id) {
                    view.reject_optimistic(token);
                }
                Err(e)
            }
        }
    }

    /// Operator shorthand: first contact toward a psychologist, creating
    /// the conversation as a side effect. No optimistic placeholder here
    /// because the conversation id is not known until the store answers.
    pub async fn send_to_psychologist(
        &mut self,
        recipient_id: i64,
        content: String,
    ) -> Result<Message, ChannelError> {
        let canonical = self.api.create_message_to(recipient_id, &content).await?;
        let own_sender = self.own_sender();
        let view = self
            .views
            .entry(canonical.conversation_id)
            .or_insert_with(|| ConversationView::new(canonical.conversation_id, own_sender));
        view.ingest_remote(canonical.clone());
        Ok(canonical)
    }

    /// Foreground/background transitions. Returning to the foreground
    /// triggers the same resync a reconnect does.
    pub async fn set_foreground(&mut self, foreground: bool) -> Result<(), ChannelError> {
        let was = self.foreground;
        self.foreground = foreground;
        if foreground && !was {
            return self.resync().await;
        }
        Ok(())
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    /// Page one window further back into history. Returns how many older
    /// messages were prepended.
    pub async fn load_older(&mut self, conversation_id: i64) -> Result<usize, ChannelError> {
        let Some(oldest) = self
            .views
            .get(&conversation_id)
            .and_then(|view| view.oldest_id())
        else {
            return Ok(0);
        };
        let page = self
            .api
            .fetch_history(conversation_id, Some(oldest), Some(self.page_size))
            .await?;
        match self.views.get_mut(&conversation_id) {
            Some(view) => {
                view.set_has_more(page.has_more);
                Ok(view.ingest_older(page.messages))
            }
            None => Ok(0),
        }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn active(&self) -> Option<i64> {
        self.active
    }

    pub fn view(&self, conversation_id: i64) -> Option<&ConversationView> {
        self.views.get(&conversation_id)
    }

    pub fn active_view(&self) -> Option<&ConversationView> {
        self.active.and_then(|id| self.views.get(&id))
    }

    pub fn active_view_mut(&mut self) -> Option<&mut ConversationView> {
        let id = self.active?;
        self.views.get_mut(&id)
    }

    pub fn link_state(&self) -> LinkState {
        self.connection
            .as_ref()
            .map(|c| c.link_state())
            .unwrap_or(LinkState::Closed)
    }

    pub fn badge_count(&self) -> usize {
        self.unread.badge_count()
    }

    pub fn is_unread(&self, conversation_id: i64) -> bool {
        self.unread.contains(conversation_id)
    }

    /// Test seam: open a view without touching the network.
    #[cfg(test)]
    pub(crate) fn open_offline(&mut self, conversation_id: i64) {
        let own_sender = self.own_sender();
        self.views
            .entry(conversation_id)
            .or_insert_with(|| ConversationView::new(conversation_id, own_sender));
        self.active = Some(conversation_id);
        self.unread.activate(conversation_id);
    }
}

// =============================================================================
// Tests
// =============================================================================
