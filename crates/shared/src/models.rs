//! Chat domain models: messages, rooms, typing signals, read receipts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted message body length, matching the backend validation.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Derive the conversation room id for a task.
///
/// Every task gets exactly one room, named after its id.
pub fn room_id_for_task(task_id: u64) -> String {
    format!("task-{}", task_id)
}

/// Message content type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    #[default]
    Text,
    System,
    File,
    Image,
}

/// A single chat message within a task room.
///
/// Immutable once acknowledged by the backend; the core never mutates
/// messages it has delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub body: String,
    #[serde(default)]
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
}

/// Room lifecycle status as reported by the backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Active,
    Closed,
}

/// Metadata for a task conversation room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: String,
    pub task_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
    pub status: RoomStatus,
}

/// "User X is typing in room Y". Ephemeral; expiry is a UI concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub room_id: String,
    pub user_id: String,
}

/// Batch acknowledgment that a set of messages has been read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub room_id: String,
    pub message_ids: Vec<String>,
}
