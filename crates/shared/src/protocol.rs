//! Wire protocol: the envelope and the command/event vocabulary
//! exchanged over the chat socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, MessageType, RoomInfo};

/// Generic envelope for every frame on the socket.
///
/// The payload is flattened so the tagged command/event enums read as
/// top-level `type`/`data` fields on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsEnvelope<T> {
    pub id: String,
    #[serde(flatten)]
    pub payload: T,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl<T> WsEnvelope<T> {
    /// Wrap a payload in a fresh envelope.
    pub fn new(payload: T) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            payload,
            ts: Utc::now(),
            correlation_id: None,
        }
    }
}

/// Commands the session manager sends to the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    #[serde(rename = "room.join")]
    JoinRoom { room_id: String },
    #[serde(rename = "message.create")]
    SendMessage {
        room_id: String,
        body: String,
        #[serde(default)]
        message_type: MessageType,
    },
    Typing { room_id: String },
    StopTyping { room_id: String },
    #[serde(rename = "messages.read")]
    MarkRead {
        room_id: String,
        message_ids: Vec<String>,
    },
}

/// Events the backend pushes to the session manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Join confirmation with recent history. History is a presentation
    /// concern; the core only logs it.
    #[serde(rename = "room.joined")]
    RoomJoined {
        room: RoomInfo,
        #[serde(default)]
        messages: Vec<ChatMessage>,
    },
    #[serde(rename = "message.new")]
    MessageNew {
        room_id: String,
        message: ChatMessage,
    },
    #[serde(rename = "user.typing")]
    UserTyping {
        room_id: String,
        user_id: String,
        is_typing: bool,
    },
    #[serde(rename = "messages.read")]
    MessagesRead {
        room_id: String,
        message_ids: Vec<String>,
    },
    Error { code: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_command_wire_shape() {
        let cmd = ClientCommand::JoinRoom {
            room_id: "task-42".to_string(),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "room.join");
        assert_eq!(json["data"]["roomId"], "task-42");
    }

    #[test]
    fn envelope_flattens_payload() {
        let envelope = WsEnvelope::new(ClientCommand::Typing {
            room_id: "task-7".to_string(),
        });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "typing");
        assert_eq!(json["data"]["roomId"], "task-7");
        assert!(json.get("correlationId").is_none());
        assert!(json["id"].is_string());
    }

    #[test]
    fn server_event_round_trips_through_envelope() {
        let text = r#"{
            "id": "e1",
            "type": "user.typing",
            "data": { "roomId": "task-42", "userId": "u9", "isTyping": true },
            "ts": "2026-08-01T12:00:00Z"
        }"#;
        let envelope: WsEnvelope<ServerEvent> = serde_json::from_str(text).unwrap();
        assert_eq!(
            envelope.payload,
            ServerEvent::UserTyping {
                room_id: "task-42".to_string(),
                user_id: "u9".to_string(),
                is_typing: true,
            }
        );
    }
}
