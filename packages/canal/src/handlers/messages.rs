//! Message endpoints: creation and history windows
//!
//! Creation persists first, then best-effort pushes `receiveMessage` to the
//! recipient's live session. A missed push is not an error; the recipient
//! heals on its next resync.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, error};

use super::{ApiError, api_error};
use crate::AppState;
use crate::auth::AuthUser;
use crate::models::{ChannelIdentity, Conversation, HistoryPage, Message};
use crate::ws::ServerMessage;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    #[serde(default)]
    pub conversation_id: Option<i64>,
    /// Operator shorthand: open (or reuse) the channel to this psychologist.
    #[serde(default)]
    pub recipient_id: Option<i64>,
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    /// Page backwards: only messages with id strictly below this.
    pub before_id: Option<i64>,
    /// Resync tail: everything after this id, oldest first.
    pub after_id: Option<i64>,
    pub limit: Option<i64>,
}

/// POST /api/messages - persist a message and push it to the counterpart
pub async fn create_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "content must not be empty",
        ));
    }
    if req.content.len() > state.server_config.max_message_bytes {
        return Err(api_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "content exceeds the maximum message size",
        ));
    }

    let conversation = resolve_conversation(&state, auth.0, &req).await?;

    let message = Message::new(conversation.id, auth.0.sender_type(), req.content);
    let persisted = state.repository.insert_message(&message).await.map_err(|e| {
        error!("Failed to persist message: {}", e);
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to persist message",
        )
    })?;
    state.metrics.message_created();

    // Best-effort live push to the other side of the channel
    let recipient = match auth.0 {
        ChannelIdentity::Admin => ChannelIdentity::Psychologist(conversation.psychologist_id),
        ChannelIdentity::Psychologist(_) => ChannelIdentity::Admin,
    };
    if let Some(id) = persisted.id {
        let push = ServerMessage::ReceiveMessage {
            id,
            conversation_id: persisted.conversation_id,
            sender_type: persisted.sender_type,
            content: persisted.content.clone(),
            created_at: persisted.created_at,
        };
        if state.registry.send_to(recipient, push).await {
            state.metrics.push_sent();
        } else {
            debug!("Recipient {} offline, push skipped for message {}", recipient, id);
            state.metrics.push_dropped();
        }
    }

    Ok((StatusCode::CREATED, Json(persisted)))
}

/// Which conversation a create writes into, enforced per identity. A
/// psychologist only ever writes into their own channel; the operator
/// addresses one explicitly or opens one by recipient.
async fn resolve_conversation(
    state: &AppState,
    identity: ChannelIdentity,
    req: &CreateMessageRequest,
) -> Result<Conversation, ApiError> {
    let store_error = |e: anyhow::Error| {
        error!("Failed to resolve conversation: {}", e);
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to resolve conversation",
        )
    };

    match identity {
        ChannelIdentity::Psychologist(pid) => {
            let conversation = state
                .repository
                .find_or_create_conversation(pid)
                .await
                .map_err(store_error)?;
            if let Some(requested) = req.conversation_id {
                if requested != conversation.id {
                    return Err(api_error(
                        StatusCode::FORBIDDEN,
                        "conversation belongs to another account",
                    ));
                }
            }
            Ok(conversation)
        }
        ChannelIdentity::Admin => {
            if let Some(id) = req.conversation_id {
                state
                    .repository
                    .get_conversation(id)
                    .await
                    .map_err(store_error)?
                    .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "conversation not found"))
            } else if let Some(pid) = req.recipient_id {
                state
                    .repository
                    .find_or_create_conversation(pid)
                    .await
                    .map_err(store_error)
            } else {
                Err(api_error(
                    StatusCode::BAD_REQUEST,
                    "conversationId or recipientId is required",
                ))
            }
        }
    }
}

/// GET /api/conversations/{id}/messages - ordered history window
pub async fn get_history(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(conversation_id): Path<i64>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryPage>, ApiError> {
    let conversation = state
        .repository
        .get_conversation(conversation_id)
        .await
        .map_err(|e| {
            error!("Failed to load conversation {}: {}", conversation_id, e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to load conversation",
            )
        })?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "conversation not found"))?;

    if let ChannelIdentity::Psychologist(pid) = auth.0 {
        if conversation.psychologist_id != pid {
            return Err(api_error(
                StatusCode::FORBIDDEN,
                "conversation belongs to another account",
            ));
        }
    }

    // after_id serves reconciliation: the full ascending tail, no paging
    if let Some(after) = params.after_id {
        let messages = state
            .repository
            .get_messages_after(conversation.id, after)
            .await
            .map_err(|e| {
                error!("Failed to load message tail: {}", e);
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load messages")
            })?;
        return Ok(Json(HistoryPage {
            messages,
            has_more: false,
        }));
    }

    let limit = params
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let (messages, has_more) = state
        .repository
        .get_history(conversation.id, params.before_id, limit)
        .await
        .map_err(|e| {
            error!("Failed to load history: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load messages")
        })?;

    Ok(Json(HistoryPage { messages, has_more }))
}
