//! Request/response interface to the relay.
//!
//! Everything durable goes through here: message creation, history windows,
//! the conversation list. The realtime socket only carries pushes and
//! acknowledgements. Failures map onto the channel taxonomy at this
//! boundary: credential rejections surface as authentication errors, fetch
//! failures as transport (the caller degrades to polling), and creation
//! failures as persistence (the caller rolls back its optimistic entry).

use reqwest::StatusCode;
use url::form_urlencoded;

use crate::auth::IDENTITY_HEADER;
use crate::config::ClientConfig;
use crate::error::ChannelError;
use crate::models::{ChannelIdentity, Conversation, ConversationSummary, HistoryPage, Message};

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    identity: ChannelIdentity,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, identity: ChannelIdentity) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.server_url.clone(),
            identity,
            token: config.token.clone(),
        }
    }

    pub fn identity(&self) -> ChannelIdentity {
        self.identity
    }

    /// The websocket endpoint for this identity. Credentials ride as query
    /// parameters because upgrade requests cannot always carry headers.
    pub fn ws_url(&self) -> String {
        let endpoint = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            format!("ws://{}", self.base_url)
        };
        let mut url = format!("{}/ws?identity={}", endpoint, self.identity);
        if let Some(token) = &self.token {
            // Tokens are opaque; reserved characters must not break the
            // query string.
            url.push_str("&token=");
            url.extend(form_urlencoded::byte_serialize(token.as_bytes()));
        }
        url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header(IDENTITY_HEADER, self.identity.to_string());
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// History window for a conversation, oldest first within the page.
    pub async fn fetch_history(
        &self,
        conversation_id: i64,
        before_id: Option<i64>,
        limit: Option<i64>,
    ) -> Result<HistoryPage, ChannelError> {
        let mut path = format!("/api/conversations/{}/messages", conversation_id);
        let mut sep = '?';
        if let Some(before) = before_id {
            path.push_str(&format!("{}beforeId={}", sep, before));
            sep = '&';
        }
        if let Some(limit) = limit {
            path.push_str(&format!("{}limit={}", sep, limit));
        }

        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        let response = check(response, ChannelError::Transport).await?;
        response
            .json()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    /// Everything after a known id, oldest first. The resync workhorse.
    pub async fn fetch_after(
        &self,
        conversation_id: i64,
        after_id: i64,
    ) -> Result<Vec<Message>, ChannelError> {
        let path = format!(
            "/api/conversations/{}/messages?afterId={}",
            conversation_id, after_id
        );
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        let response = check(response, ChannelError::Transport).await?;
        let page: HistoryPage = response
            .json()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(page.messages)
    }

    /// Create a message in an existing conversation. Failures are
    /// persistence errors: the caller rolls back its placeholder.
    pub async fn create_message(
        &self,
        conversation_id: i64,
        content: &str,
    ) -> Result<Message, ChannelError> {
        self.create(serde_json::json!({
            "conversationId": conversation_id,
            "content": content,
        }))
        .await
    }

    /// Operator shorthand: create toward a psychologist, opening the
    /// channel on first contact.
    pub async fn create_message_to(
        &self,
        recipient_id: i64,
        content: &str,
    ) -> Result<Message, ChannelError> {
        self.create(serde_json::json!({
            "recipientId": recipient_id,
            "content": content,
        }))
        .await
    }

    async fn create(&self, body: serde_json::Value) -> Result<Message, ChannelError> {
        let response = self
            .request(reqwest::Method::POST, "/api/messages")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Persistence(e.to_string()))?;
        let response = check(response, ChannelError::Persistence).await?;
        response
            .json()
            .await
            .map_err(|e| ChannelError::Persistence(e.to_string()))
    }

    /// Operator's conversation list with unread counts.
    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ChannelError> {
        let response = self
            .request(reqwest::Method::GET, "/api/conversations")
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        let response = check(response, ChannelError::Transport).await?;
        response
            .json()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    /// The calling psychologist's own channel, created on first contact.
    pub async fn my_conversation(&self) -> Result<Conversation, ChannelError> {
        let response = self
            .request(reqwest::Method::GET, "/api/conversations/me")
            .send()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        let response = check(response, ChannelError::Transport).await?;
        response
            .json()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }
}

/// Classify a failed response. Credential rejections always become
/// authentication errors; anything else uses the caller's constructor.
async fn check(
    response: reqwest::Response,
    on_failure: fn(String) -> ChannelError,
) -> Result<reqwest::Response, ChannelError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(ChannelError::Authentication(body_error(response).await));
    }
    if !status.is_success() {
        return Err(on_failure(body_error(response).await));
    }
    Ok(response)
}

async fn body_error(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("error")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("request failed with status {}", status)),
        Err(_) => format!("request failed with status {}", status),
    }
}
