use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Which side of the channel authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SenderType {
    Admin,
    Psychologist,
}

impl SenderType {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderType::Admin => "admin",
            SenderType::Psychologist => "psychologist",
        }
    }

    /// The party on the receiving end of a message authored by this sender.
    pub fn counterpart(self) -> SenderType {
        match self {
            SenderType::Admin => SenderType::Psychologist,
            SenderType::Psychologist => SenderType::Admin,
        }
    }
}

impl fmt::Display for SenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery state of a message. Moves forward only: sent < delivered < read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn rank(self) -> u8 {
        match self {
            MessageStatus::Sent => 0,
            MessageStatus::Delivered => 1,
            MessageStatus::Read => 2,
        }
    }

    /// True when replacing `self` with `next` does not move backwards in the
    /// sent < delivered < read order. Equal states are allowed (idempotent
    /// re-application), earlier states are not.
    pub fn allows(self, next: MessageStatus) -> bool {
        next.rank() >= self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message. `id` is `None` only for the optimistic placeholder a
/// sender renders before the store has acknowledged persistence.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Option<i64>,
    pub conversation_id: i64,
    pub sender_type: SenderType,
    pub content: String,
    pub created_at: i64,
    pub status: MessageStatus,
}

impl Message {
    pub fn new(conversation_id: i64, sender_type: SenderType, content: String) -> Self {
        Self {
            id: None,
            conversation_id,
            sender_type,
            content,
            created_at: Utc::now().timestamp(),
            status: MessageStatus::Sent,
        }
    }
}

/// One operator/psychologist channel. At most one exists per psychologist.
/// Always read back from the store, so the id is never provisional.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    pub psychologist_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// One row of the operator's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: i64,
    pub psychologist_id: i64,
    pub last_message: Option<String>,
    pub last_message_at: Option<i64>,
    /// Messages from the psychologist the operator has not read yet.
    pub unread_count: i64,
}

/// One page of conversation history, oldest message first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

/// Logical identity behind a session. The operator side is one shared
/// channel; every psychologist account is its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelIdentity {
    Admin,
    Psychologist(i64),
}

impl ChannelIdentity {
    pub fn sender_type(self) -> SenderType {
        match self {
            ChannelIdentity::Admin => SenderType::Admin,
            ChannelIdentity::Psychologist(_) => SenderType::Psychologist,
        }
    }
}

impl fmt::Display for ChannelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelIdentity::Admin => f.write_str("admin"),
            ChannelIdentity::Psychologist(id) => write!(f, "psychologist:{}", id),
        }
    }
}

impl FromStr for ChannelIdentity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("admin") {
            return Ok(ChannelIdentity::Admin);
        }
        if let Some(rest) = s.strip_prefix("psychologist:") {
            let id: i64 = rest
                .parse()
                .map_err(|_| format!("invalid psychologist id: {}", rest))?;
            return Ok(ChannelIdentity::Psychologist(id));
        }
        Err(format!(
            "unknown identity {:?} (expected \"admin\" or \"psychologist:<id>\")",
            s
        ))
    }
}
