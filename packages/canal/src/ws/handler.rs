//! WebSocket Handler
//!
//! Relay lifecycle for one identity's socket: register (force-closing any
//! prior session for the identity), greet, pump frames both ways, apply
//! acknowledgements, unregister on the way out.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::auth::AuthUser;
use crate::models::{ChannelIdentity, MessageStatus};

use super::protocol::{ClientMessage, ServerMessage};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    auth: AuthUser,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, auth.0, state))
}

async fn handle_socket(socket: WebSocket, identity: ChannelIdentity, state: AppState) {
    state.metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for frames queued to this socket
    let (tx, mut rx) =
        mpsc::channel::<ServerMessage>(state.server_config.send_channel_capacity);

    let (session, superseded_prior) = state.registry.register(identity, tx.clone()).await;
    if superseded_prior {
        state.metrics.session_superseded();
    }
    info!(
        connection_id = %session.connection_id,
        %identity,
        generation = session.generation,
        "websocket connected"
    );

    // Greet so the client learns its connection id
    if tx
        .send(ServerMessage::Connected {
            connection_id: session.connection_id.clone(),
        })
        .await
        .is_err()
    {
        warn!(connection_id = %session.connection_id, "Failed to queue greeting - channel closed");
    }
    drop(tx);

    loop {
        tokio::select! {
            // Frames queued for this socket by the registry
            maybe = rx.recv() => match maybe {
                Some(msg) => {
                    let json = match serde_json::to_string(&msg) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("Failed to serialize frame: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },

            // Frames arriving from the client
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_client_frame(&text, identity, &state).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                // Ping/pong is answered by the protocol stack
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(connection_id = %session.connection_id, "websocket read error: {}", e);
                    break;
                }
            },

            // A newer session for this identity took over
            _ = session.cancel.cancelled() => {
                // Flush the farewell the registry already queued, then close
                while let Ok(msg) = rx.try_recv() {
                    if let Ok(json) = serde_json::to_string(&msg) {
                        let _ = ws_sender.send(WsMessage::Text(json.into())).await;
                    }
                }
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }

    state
        .registry
        .unregister(identity, session.generation)
        .await;
    state.metrics.connection_closed();
    info!(
        connection_id = %session.connection_id,
        %identity,
        "websocket disconnected"
    );
}

/// Apply one acknowledgement frame. Stale, duplicate, foreign, or malformed
/// frames are absorbed here; nothing a client sends closes its own socket.
pub(crate) async fn handle_client_frame(text: &str, identity: ChannelIdentity, state: &AppState) {
    let frame = match serde_json::from_str::<ClientMessage>(text) {
        Ok(frame) => frame,
        Err(e) => {
            state.metrics.bad_frame();
            warn!(%identity, "dropping unparseable frame: {}", e);
            return;
        }
    };

    match frame {
        ClientMessage::MessageDelivered { message_id } => {
            let message = match state.repository.get_message_by_id(message_id).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    state.metrics.ack_ignored();
                    return;
                }
                Err(e) => {
                    error!(%identity, message_id, "failed to load message for ack: {}", e);
                    return;
                }
            };
            if !participant_check(state, identity, message.conversation_id).await {
                return;
            }

            match state
                .repository
                .mark_delivered(message_id, identity.sender_type())
                .await
            {
                Ok(Some(updated)) => {
                    state.metrics.ack_applied();
                    if let Some(author) =
                        author_identity(state, identity, updated.conversation_id).await
                    {
                        echo_status(state, author, message_id, MessageStatus::Delivered).await;
                    }
                }
                Ok(None) => state.metrics.ack_ignored(),
                Err(e) => {
                    error!(%identity, message_id, "failed to apply delivery ack: {}", e)
                }
            }
        }

        ClientMessage::MessagesRead { conversation_id } => {
            if !participant_check(state, identity, conversation_id).await {
                return;
            }

            match state
                .repository
                .mark_conversation_read(conversation_id, identity.sender_type())
                .await
            {
                Ok(ids) if ids.is_empty() => state.metrics.ack_ignored(),
                Ok(ids) => {
                    let Some(author) = author_identity(state, identity, conversation_id).await
                    else {
                        return;
                    };
                    // One echo per message so the author's indicators advance
                    // individually, whatever order they were rendered in
                    for message_id in ids {
                        state.metrics.ack_applied();
                        echo_status(state, author, message_id, MessageStatus::Read).await;
                    }
                }
                Err(e) => {
                    error!(%identity, conversation_id, "failed to apply read ack: {}", e)
                }
            }
        }
    }
}

/// Whether `identity` belongs to this conversation. The operator is in every
/// conversation; a psychologist only in their own.
async fn participant_check(
    state: &AppState,
    identity: ChannelIdentity,
    conversation_id: i64,
) -> bool {
    let conversation = match state.repository.get_conversation(conversation_id).await {
        Ok(conversation) => conversation,
        Err(e) => {
            error!(%identity, conversation_id, "failed to load conversation: {}", e);
            return false;
        }
    };

    let allowed = match identity {
        ChannelIdentity::Admin => conversation.is_some(),
        ChannelIdentity::Psychologist(pid) => {
            conversation.is_some_and(|c| c.psychologist_id == pid)
        }
    };
    if !allowed {
        state.metrics.ack_ignored();
        warn!(%identity, conversation_id, "dropping ack for foreign conversation");
    }
    allowed
}

/// The identity on the authoring side of `acker`'s conversation.
async fn author_identity(
    state: &AppState,
    acker: ChannelIdentity,
    conversation_id: i64,
) -> Option<ChannelIdentity> {
    match acker {
        ChannelIdentity::Psychologist(_) => Some(ChannelIdentity::Admin),
        ChannelIdentity::Admin => match state.repository.get_conversation(conversation_id).await {
            Ok(conversation) => {
                conversation.map(|c| ChannelIdentity::Psychologist(c.psychologist_id))
            }
            Err(e) => {
                error!(conversation_id, "failed to resolve message author: {}", e);
                None
            }
        },
    }
}

/// Best-effort status echo to the author. A missed echo is healed by the
/// author's next reconciliation, so delivery is not retried here.
async fn echo_status(
    state: &AppState,
    author: ChannelIdentity,
    message_id: i64,
    status: MessageStatus,
) {
    let delivered = state
        .registry
        .send_to(
            author,
            ServerMessage::MessageStatusUpdated { message_id, status },
        )
        .await;
    if delivered {
        state.metrics.status_update_sent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, SenderType};
    use crate::test_helpers::test_app_state;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    async fn seeded_message(state: &AppState, content: &str) -> i64 {
        let conv = state
            .repository
            .find_or_create_conversation(1)
            .await
            .unwrap();
        let msg = state
            .repository
            .insert_message(&Message::new(conv.id, SenderType::Admin, content.into()))
            .await
            .unwrap();
        msg.id.unwrap()
    }

    #[tokio::test]
    async fn delivered_ack_echoes_to_author() {
        let state = test_app_state().await;
        let message_id = seeded_message(&state, "Oi").await;

        // Author (admin) is online
        let (tx, mut rx) = mpsc::channel(8);
        state.registry.register(ChannelIdentity::Admin, tx).await;

        let frame = format!(r#"{{"type":"message_delivered","messageId":{}}}"#, message_id);
        handle_client_frame(&frame, ChannelIdentity::Psychologist(1), &state).await;

        match rx.try_recv() {
            Ok(ServerMessage::MessageStatusUpdated {
                message_id: id,
                status,
            }) => {
                assert_eq!(id, message_id);
                assert_eq!(status, MessageStatus::Delivered);
            }
            other => panic!("Expected MessageStatusUpdated, got {:?}", other),
        }
        assert_eq!(state.metrics.acks_applied.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn duplicate_ack_is_absorbed() {
        let state = test_app_state().await;
        let message_id = seeded_message(&state, "Oi").await;

        let (tx, mut rx) = mpsc::channel(8);
        state.registry.register(ChannelIdentity::Admin, tx).await;

        let frame = format!(r#"{{"type":"message_delivered","messageId":{}}}"#, message_id);
        handle_client_frame(&frame, ChannelIdentity::Psychologist(1), &state).await;
        handle_client_frame(&frame, ChannelIdentity::Psychologist(1), &state).await;

        // Only the first ack produced an echo
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(state.metrics.acks_applied.load(Ordering::Relaxed), 1);
        assert_eq!(state.metrics.acks_ignored.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn read_ack_echoes_one_update_per_message() {
        let state = test_app_state().await;
        let first = seeded_message(&state, "um").await;
        let second = seeded_message(&state, "dois").await;
        let conv_id = state
            .repository
            .get_message_by_id(first)
            .await
            .unwrap()
            .unwrap()
            .conversation_id;

        let (tx, mut rx) = mpsc::channel(8);
        state.registry.register(ChannelIdentity::Admin, tx).await;

        let frame = format!(r#"{{"type":"messages_read","conversationId":{}}}"#, conv_id);
        handle_client_frame(&frame, ChannelIdentity::Psychologist(1), &state).await;

        let mut seen = Vec::new();
        while let Ok(ServerMessage::MessageStatusUpdated { message_id, status }) = rx.try_recv() {
            assert_eq!(status, MessageStatus::Read);
            seen.push(message_id);
        }
        assert_eq!(seen, vec![first, second]);
    }

    #[tokio::test]
    async fn foreign_conversation_ack_is_dropped() {
        let state = test_app_state().await;
        let message_id = seeded_message(&state, "Oi").await;

        // Another psychologist must not be able to ack psychologist 1's mail
        let frame = format!(r#"{{"type":"message_delivered","messageId":{}}}"#, message_id);
        handle_client_frame(&frame, ChannelIdentity::Psychologist(99), &state).await;

        let msg = state
            .repository
            .get_message_by_id(message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(state.metrics.acks_ignored.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unknown_message_ack_is_ignored() {
        let state = test_app_state().await;
        let frame = r#"{"type":"message_delivered","messageId":424242}"#;
        handle_client_frame(frame, ChannelIdentity::Psychologist(1), &state).await;
        assert_eq!(state.metrics.acks_ignored.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn malformed_frame_counts_as_bad() {
        let state = test_app_state().await;
        handle_client_frame("not json", ChannelIdentity::Admin, &state).await;
        handle_client_frame(
            r#"{"type":"no_such_event"}"#,
            ChannelIdentity::Admin,
            &state,
        )
        .await;
        assert_eq!(state.metrics.bad_frames.load(Ordering::Relaxed), 2);
    }
}
