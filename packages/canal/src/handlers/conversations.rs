//! Conversation endpoints
//!
//! The operator sees every channel with unread counts; a psychologist has
//! exactly one channel and only ever sees their own.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use super::{ApiError, api_error};
use crate::AppState;
use crate::auth::AuthUser;
use crate::models::ChannelIdentity;

/// GET /api/conversations - operator-only list, most recently active first.
/// Unread counts seed the operator's badge on startup.
pub async fn list_conversations(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    if !matches!(auth.0, ChannelIdentity::Admin) {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "operator credential required",
        ));
    }

    let summaries = state
        .repository
        .list_conversation_summaries()
        .await
        .map_err(|e| {
            error!("Failed to list conversations: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to list conversations",
            )
        })?;
    Ok(Json(summaries))
}

/// GET /api/conversations/me - the calling psychologist's channel, created
/// on first contact
pub async fn get_my_conversation(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let pid = match auth.0 {
        ChannelIdentity::Psychologist(pid) => pid,
        ChannelIdentity::Admin => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "the operator has no single channel; list conversations instead",
            ));
        }
    };

    let conversation = state
        .repository
        .find_or_create_conversation(pid)
        .await
        .map_err(|e| {
            error!("Failed to resolve conversation: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to resolve conversation",
            )
        })?;
    Ok(Json(conversation))
}
