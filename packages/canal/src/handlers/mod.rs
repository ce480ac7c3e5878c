// Route handlers for the canal server
//
// Organized by resource:
// - health: liveness, readiness, and metrics endpoints
// - conversations: operator list and psychologist channel lookup
// - messages: history windows and message creation

pub mod conversations;
pub mod health;
pub mod messages;

pub use conversations::{get_my_conversation, list_conversations};
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use messages::{create_message, get_history};

use axum::Json;
use axum::http::StatusCode;

/// Error responses carry a small JSON body so clients can surface the reason.
pub(crate) type ApiError = (StatusCode, Json<serde_json::Value>);

pub(crate) fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(serde_json::json!({ "error": message })))
}
