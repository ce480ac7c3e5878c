//! Wire protocol for the realtime channel.
//!
//! Event names are a contract with deployed clients, so every serde tag is
//! pinned explicitly instead of derived from the variant name. That is also
//! why the naming is mixed: `receiveMessage` but `messages_read`.

use serde::{Deserialize, Serialize};

use crate::models::{MessageStatus, SenderType};

/// Messages sent from client to server over the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Receiving client confirms a message reached an open view.
    #[serde(rename = "message_delivered", rename_all = "camelCase")]
    MessageDelivered { message_id: i64 },

    /// Receiving client confirms it has seen everything in a conversation.
    #[serde(rename = "messages_read", rename_all = "camelCase")]
    MessagesRead { conversation_id: i64 },
}

/// Messages sent from server to client over the socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// First frame after an accepted upgrade.
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected { connection_id: String },

    /// A message authored by the other party, pushed to its recipient.
    #[serde(rename = "receiveMessage", rename_all = "camelCase")]
    ReceiveMessage {
        id: i64,
        conversation_id: i64,
        sender_type: SenderType,
        content: String,
        created_at: i64,
    },

    /// Echo to the author once the recipient acknowledged delivery or read.
    #[serde(rename = "message_status_updated", rename_all = "camelCase")]
    MessageStatusUpdated {
        message_id: i64,
        status: MessageStatus,
    },

    /// Terminal notice sent just before the server closes the socket.
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    /// Notice delivered to a session being replaced by a newer one for the
    /// same identity. Clients match on this text to skip reconnecting.
    pub const SUPERSEDED_NOTICE: &'static str = "session superseded by a newer connection";

    pub fn superseded() -> Self {
        ServerMessage::Error {
            message: Self::SUPERSEDED_NOTICE.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ============================================================================
    // Client -> server frames
    // ============================================================================

    #[test]
    fn message_delivered_wire_shape() {
        let msg = ClientMessage::MessageDelivered { message_id: 7 };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "message_delivered");
        assert_eq!(json["messageId"], 7);
    }

    #[test]
    fn messages_read_wire_shape() {
        let msg = ClientMessage::MessagesRead { conversation_id: 3 };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "messages_read");
        assert_eq!(json["conversationId"], 3);
    }

    #[test]
    fn parse_client_ack() {
        let raw = r#"{"type":"message_delivered","messageId":42}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::MessageDelivered { message_id } => assert_eq!(message_id, 42),
            _ => panic!("Expected MessageDelivered"),
        }
    }

    #[test]
    fn unknown_client_frame_is_an_error() {
        let raw = r#"{"type":"typing_started","conversationId":1}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    // ============================================================================
    // Server -> client frames
    // ============================================================================

    #[test]
    fn connected_wire_shape() {
        let msg = ServerMessage::Connected {
            connection_id: "abc-123".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["connectionId"], "abc-123");
    }

    #[test]
    fn receive_message_wire_shape() {
        let msg = ServerMessage::ReceiveMessage {
            id: 7,
            conversation_id: 3,
            sender_type: SenderType::Admin,
            content: "Oi".to_string(),
            created_at: 1755700000,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "receiveMessage");
        assert_eq!(json["id"], 7);
        assert_eq!(json["conversationId"], 3);
        assert_eq!(json["senderType"], "admin");
        assert_eq!(json["content"], "Oi");
        assert_eq!(json["createdAt"], 1755700000);
    }

    #[test]
    fn status_updated_wire_shape() {
        let msg = ServerMessage::MessageStatusUpdated {
            message_id: 7,
            status: MessageStatus::Read,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "message_status_updated");
        assert_eq!(json["messageId"], 7);
        assert_eq!(json["status"], "read");
    }

    #[test]
    fn parse_server_push() {
        let raw = r#"{"type":"receiveMessage","id":9,"conversationId":2,"senderType":"psychologist","content":"Olá","createdAt":1755700123}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ServerMessage::ReceiveMessage {
                id,
                sender_type,
                content,
                ..
            } => {
                assert_eq!(id, 9);
                assert_eq!(sender_type, SenderType::Psychologist);
                assert_eq!(content, "Olá");
            }
            _ => panic!("Expected ReceiveMessage"),
        }
    }

    #[test]
    fn superseded_notice_round_trips() {
        let raw = serde_json::to_string(&ServerMessage::superseded()).unwrap();
        let msg: ServerMessage = serde_json::from_str(&raw).unwrap();
        match msg {
            ServerMessage::Error { message } => {
                assert_eq!(message, ServerMessage::SUPERSEDED_NOTICE)
            }
            _ => panic!("Expected Error"),
        }
    }
}
