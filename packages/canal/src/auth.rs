//! Authentication: bearer credential checked at the door, identity resolved
//! into request extensions.
//!
//! With `[auth] enabled = true` the bearer token is looked up in the
//! `[auth.tokens]` table and the identity it maps to ("admin" or
//! "psychologist:<id>") wins. With auth disabled, the default for local
//! development, the caller declares its channel via the `X-Canal-Identity`
//! header or the `identity` query parameter; WebSocket clients use the query
//! form because browsers cannot set headers on an upgrade request.

use axum::{
    Json,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use url::form_urlencoded;

use crate::config::AuthConfig;
use crate::models::ChannelIdentity;

pub const IDENTITY_HEADER: &str = "x-canal-identity";

// =============================================================================
// AuthUser
// =============================================================================

/// Authenticated caller, populated by the auth middleware.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub ChannelIdentity);

// =============================================================================
// Auth Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication required")]
    MissingToken,
    #[error("invalid bearer token")]
    InvalidToken,
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::MissingToken | AuthError::InvalidToken => {
                (StatusCode::UNAUTHORIZED, self.to_string())
            }
            AuthError::InvalidIdentity(_) => (StatusCode::BAD_REQUEST, self.to_string()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// =============================================================================
// Auth State (shared across middleware and handlers)
// =============================================================================

#[derive(Clone)]
pub struct AuthState {
    pub auth_config: Arc<AuthConfig>,
}

// =============================================================================
// Auth Middleware
// =============================================================================

/// Auth middleware for HTTP and WebSocket routes.
///
/// 1. Public routes (health, metrics) → pass through
/// 2. Auth enabled: the bearer token resolves the identity via [auth.tokens]
/// 3. Auth disabled: the declared identity is trusted (dev mode)
pub async fn auth_middleware(
    State(auth_state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    // Exempt public routes
    if is_public_route(&path) {
        return next.run(request).await;
    }

    let identity = if auth_state.auth_config.enabled {
        match bearer_token(&request) {
            None => return AuthError::MissingToken.into_response(),
            Some(token) => match auth_state.auth_config.tokens.get(&token) {
                Some(identity) => *identity,
                None => return AuthError::InvalidToken.into_response(),
            },
        }
    } else {
        match declared_identity(&request) {
            Ok(identity) => identity,
            Err(err) => return err.into_response(),
        }
    };

    request.extensions_mut().insert(AuthUser(identity));
    next.run(request).await
}

fn is_public_route(path: &str) -> bool {
    path == "/health" || path.starts_with("/health/") || path == "/metrics"
}

/// Bearer credential from the Authorization header, or from the `token`
/// query parameter for upgrade requests that cannot carry headers.
fn bearer_token(request: &Request<Body>) -> Option<String> {
    if let Some(value) = request.headers().get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = value.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    query_param(request.uri().query(), "token")
}

/// The channel the caller claims to be. Defaults to the operator channel
/// when nothing is declared.
fn declared_identity(request: &Request<Body>) -> Result<ChannelIdentity, AuthError> {
    let raw = request
        .headers()
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| query_param(request.uri().query(), "identity"));

    match raw {
        None => Ok(ChannelIdentity::Admin),
        Some(raw) => raw.parse::<ChannelIdentity>().map_err(AuthError::InvalidIdentity),
    }
}

// Values arrive form-encoded; the websocket client escapes its token the
// same way, so decoding here closes the round trip.
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    let query = query?;
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.into_owned())
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Extract AuthUser from request extensions (set by middleware).
/// Returns 401 if not present.
impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthUser>().copied().ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"error": "Authentication required"})),
            )
        })
    }
}
