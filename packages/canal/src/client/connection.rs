//! Owned handle to the realtime link.
//!
//! One `Connection` object is the whole lifecycle: opening it dials the
//! relay, dropping it tears everything down. The first dial happens inline
//! so a rejected credential surfaces to the caller instead of being retried
//! forever. After that a background task owns the socket: it reads frames
//! into the event stream, writes queued acknowledgements, and redials with
//! backoff when the link drops. A superseded notice ends the task for good;
//! everything else is treated as weather.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::models::{Message, MessageStatus};
use crate::ws::{ClientMessage, ServerMessage};

use super::events::{ChannelEvent, EventStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ACK_QUEUE_CAPACITY: usize = 64;
const RETRY_BASE_SECS: u64 = 1;
const RETRY_MAX_SECS: u64 = 30;

/// Observable state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Online,
    /// Socket is down and the redial loop is running. REST still works.
    Degraded,
    Closed,
}

/// Why a socket stopped being driven.
#[derive(Debug, PartialEq)]
enum SocketEnd {
    Cancelled,
    Superseded,
    Dropped(String),
}

pub struct Connection {
    generation: u64,
    ack_tx: mpsc::Sender<ClientMessage>,
    link_rx: watch::Receiver<LinkState>,
    cancel: CancellationToken,
}

impl Connection {
    /// Dial the relay and take ownership of the socket.
    pub async fn open(ws_url: String, events: EventStream) -> Result<Self, ChannelError> {
        let generation = events.bump_generation();
        let (socket, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(ChannelError::from)?;

        let (ack_tx, ack_rx) = mpsc::channel(ACK_QUEUE_CAPACITY);
        let (link_tx, link_rx) = watch::channel(LinkState::Online);
        let cancel = CancellationToken::new();

        tokio::spawn(run_link(
            ws_url,
            socket,
            generation,
            events,
            ack_rx,
            link_tx,
            cancel.clone(),
        ));

        Ok(Self {
            generation,
            ack_tx,
            link_rx,
            cancel,
        })
    }

    /// Test seam: a connection backed only by its ack queue, no socket.
    #[cfg(test)]
    pub(crate) fn with_ack_queue(ack_tx: mpsc::Sender<ClientMessage>) -> Self {
        let (link_tx, link_rx) = watch::channel(LinkState::Online);
        drop(link_tx);
        Self {
            generation: 0,
            ack_tx,
            link_rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Generation this connection publishes under. Subscribers discard
    /// anything older.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue an acknowledgement frame. Fire-and-forget: returns false when
    /// the queue is full or the link task is gone, and the caller leaves
    /// repair to the next resync instead of retrying.
    pub fn send_ack(&self, ack: ClientMessage) -> bool {
        self.ack_tx.try_send(ack).is_ok()
    }

    pub fn link_state(&self) -> LinkState {
        *self.link_rx.borrow()
    }

    /// Watch handle for rendering the offline indicator.
    pub fn watch_link(&self) -> watch::Receiver<LinkState> {
        self.link_rx.clone()
    }

    /// Tear the link down. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_link(
    ws_url: String,
    socket: WsStream,
    generation: u64,
    events: EventStream,
    mut ack_rx: mpsc::Receiver<ClientMessage>,
    link_tx: watch::Sender<LinkState>,
    cancel: CancellationToken,
) {
    let mut socket = Some(socket);
    let mut attempt: u32 = 0;

    loop {
        let Some(ws) = socket.take() else {
            let _ = link_tx.send(LinkState::Degraded);
            let delay = retry_delay(attempt);
            attempt += 1;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            match tokio_tungstenite::connect_async(&ws_url).await {
                Ok((ws, _)) => socket = Some(ws),
                Err(e) => {
                    let err = ChannelError::from(e);
                    if !err.is_recoverable() {
                        events.publish_from(
                            generation,
                            ChannelEvent::LinkDown {
                                reason: err.to_string(),
                            },
                        );
                        break;
                    }
                    debug!("Redial failed (attempt {}): {}", attempt, err);
                }
            }
            continue;
        };

        let _ = link_tx.send(LinkState::Online);
        attempt = 0;
        match drive_socket(ws, generation, &events, &mut ack_rx, &cancel).await {
            SocketEnd::Cancelled => break,
            SocketEnd::Superseded => {
                info!("Session superseded by a newer connection, not redialing");
                events.publish_from(generation, ChannelEvent::Superseded);
                break;
            }
            SocketEnd::Dropped(reason) => {
                debug!("Realtime link dropped: {}", reason);
                events.publish_from(generation, ChannelEvent::LinkDown { reason });
            }
        }
    }

    let _ = link_tx.send(LinkState::Closed);
}

/// Pump one socket until it ends. Acks flow out, frames flow into the
/// event stream.
async fn drive_socket(
    ws: WsStream,
    generation: u64,
    events: &EventStream,
    ack_rx: &mut mpsc::Receiver<ClientMessage>,
    cancel: &CancellationToken,
) -> SocketEnd {
    let (mut ws_write, mut ws_read) = ws.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_write.send(tungstenite::Message::Close(None)).await;
                return SocketEnd::Cancelled;
            }

            maybe_ack = ack_rx.recv() => {
                // Sender gone means the Connection handle was dropped.
                let Some(ack) = maybe_ack else {
                    return SocketEnd::Cancelled;
                };
                match serde_json::to_string(&ack) {
                    Ok(json) => {
                        if ws_write.send(tungstenite::Message::Text(json.into())).await.is_err() {
                            return SocketEnd::Dropped("ack write failed".to_string());
                        }
                    }
                    Err(e) => warn!("Unserializable ack frame: {}", e),
                }
            }

            frame = ws_read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(msg) => {
                                if let Some(end) = publish_frame(msg, generation, events) {
                                    return end;
                                }
                            }
                            Err(e) => warn!("Unparseable frame from server: {}", e),
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        return SocketEnd::Dropped("connection closed".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SocketEnd::Dropped(e.to_string()),
                }
            }
        }
    }
}

/// Map one server frame onto the event stream. Returns the terminal end
/// state when the frame says this session is done.
fn publish_frame(msg: ServerMessage, generation: u64, events: &EventStream) -> Option<SocketEnd> {
    match msg {
        ServerMessage::Connected { connection_id } => {
            info!("Realtime link established (connection {})", connection_id);
            events.publish_from(generation, ChannelEvent::Connected { connection_id });
            None
        }
        ServerMessage::ReceiveMessage {
            id,
            conversation_id,
            sender_type,
            content,
            created_at,
        } => {
            // Pushes carry no status. Everything starts at sent and only
            // moves forward through explicit updates.
            events.publish_from(
                generation,
                ChannelEvent::MessageReceived(Message {
                    id: Some(id),
                    conversation_id,
                    sender_type,
                    content,
                    created_at,
                    status: MessageStatus::Sent,
                }),
            );
            None
        }
        ServerMessage::MessageStatusUpdated { message_id, status } => {
            events.publish_from(generation, ChannelEvent::StatusUpdated { message_id, status });
            None
        }
        ServerMessage::Error { message } if message == ServerMessage::SUPERSEDED_NOTICE => {
            Some(SocketEnd::Superseded)
        }
        ServerMessage::Error { message } => {
            warn!("Error frame from server: {}", message);
            None
        }
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let backoff = RETRY_BASE_SECS.saturating_mul(2u64.saturating_pow(attempt.min(6)));
    Duration::from_secs(backoff.min(RETRY_MAX_SECS))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SenderType;

    #[test]
    fn retry_delay_doubles_then_caps() {
        assert_eq!(retry_delay(0), Duration::from_secs(1));
        assert_eq!(retry_delay(1), Duration::from_secs(2));
        assert_eq!(retry_delay(3), Duration::from_secs(8));
        assert_eq!(retry_delay(5), Duration::from_secs(30));
        assert_eq!(retry_delay(40), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn push_frame_becomes_a_sent_message_event() {
        let events = EventStream::new(16);
        let mut sub = events.subscribe();

        let frame = ServerMessage::ReceiveMessage {
            id: 9,
            conversation_id: 2,
            sender_type: SenderType::Psychologist,
            content: "Olá".to_string(),
            created_at: 1755700000,
        };
        assert_eq!(publish_frame(frame, 0, &events), None);

        match sub.next().await {
            Some(ChannelEvent::MessageReceived(message)) => {
                assert_eq!(message.id, Some(9));
                assert_eq!(message.conversation_id, 2);
                assert_eq!(message.status, MessageStatus::Sent);
            }
            other => panic!("Expected MessageReceived, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn status_frame_becomes_a_status_event() {
        let events = EventStream::new(16);
        let mut sub = events.subscribe();

        let frame = ServerMessage::MessageStatusUpdated {
            message_id: 4,
            status: MessageStatus::Read,
        };
        assert_eq!(publish_frame(frame, 0, &events), None);

        match sub.next().await {
            Some(ChannelEvent::StatusUpdated { message_id, status }) => {
                assert_eq!(message_id, 4);
                assert_eq!(status, MessageStatus::Read);
            }
            other => panic!("Expected StatusUpdated, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn superseded_notice_ends_the_socket() {
        let events = EventStream::new(16);
        let end = publish_frame(ServerMessage::superseded(), 0, &events);
        assert_eq!(end, Some(SocketEnd::Superseded));
    }

    #[tokio::test]
    async fn other_error_frames_are_absorbed() {
        let events = EventStream::new(16);
        let frame = ServerMessage::Error {
            message: "rate limited".to_string(),
        };
        assert_eq!(publish_frame(frame, 0, &events), None);
    }
}
