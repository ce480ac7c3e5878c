//! Typed event stream between the connection layer and the session.
//!
//! Every published event is tagged with the generation of the connection
//! that produced it. Subscriptions compare that tag against the live
//! generation at delivery time, so a torn-down socket still draining frames
//! cannot feed a newer session's view. Bumping the generation is the whole
//! teardown protocol; there is no listener removal to forget.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use tracing::warn;

use crate::models::{Message, MessageStatus};

/// Everything the realtime link can tell the rest of the client.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Socket is up and the server accepted the identity.
    Connected { connection_id: String },
    /// A message from the other party arrived.
    MessageReceived(Message),
    /// The other party acknowledged one of ours.
    StatusUpdated {
        message_id: i64,
        status: MessageStatus,
    },
    /// Socket went down; the connection keeps redialing on its own.
    LinkDown { reason: String },
    /// The server replaced this session with a newer one. Terminal.
    Superseded,
}

/// Broadcast fan-out plus the live generation counter.
#[derive(Clone)]
pub struct EventStream {
    tx: broadcast::Sender<(u64, ChannelEvent)>,
    generation: Arc<AtomicU64>,
}

impl EventStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The generation currently allowed to publish. Anything older is stale.
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Invalidate everything published so far and return the new generation.
    /// Called once per connection teardown/handover.
    pub fn bump_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publish under the generation the producing connection owns.
    pub fn publish_from(&self, generation: u64, event: ChannelEvent) {
        // Send only fails when nobody is subscribed, which is fine
        let _ = self.tx.send((generation, event));
    }

    /// Publish under the current live generation.
    pub fn publish(&self, event: ChannelEvent) {
        self.publish_from(self.current_generation(), event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            live: self.generation.clone(),
        }
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new(256)
    }
}

/// One subscriber's filtered view of the stream.
pub struct EventSubscription {
    rx: broadcast::Receiver<(u64, ChannelEvent)>,
    live: Arc<AtomicU64>,
}

impl EventSubscription {
    /// Next event from the live generation. Stale-generation events are
    /// dropped here, silently. Lagging costs dropped events, never stale
    /// ones. Returns None once every publisher is gone.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.rx.recv().await {
                Ok((generation, event)) => {
                    if generation >= self.live.load(Ordering::SeqCst) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event subscription lagged, dropped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
