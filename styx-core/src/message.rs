// ABOUTME: Core chat data types shared by the store, registry, and orchestrator.
// ABOUTME: Defines ChatMessage (immutable once created), MessageKind, and ActiveUser.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender id stamped on every message authored by the AI participant.
pub const AI_SENDER_ID: &str = "ai_styx";
/// Display name of the AI participant.
pub const AI_SENDER_NAME: &str = "Styx";
/// Sender identity for relay-generated system messages.
pub const SYSTEM_SENDER_ID: &str = "system";
pub const SYSTEM_SENDER_NAME: &str = "System";

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Ai,
    System,
}

/// A single chat message. Created once by the orchestrator and never
/// mutated afterwards; deletion is the only lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    #[serde(rename = "message_type")]
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ChatMessage {
    fn new(
        room_id: &str,
        sender_id: &str,
        sender_name: &str,
        content: &str,
        kind: MessageKind,
    ) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.to_string(),
            content: content.to_string(),
            kind,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// A message typed by a human user.
    pub fn user(room_id: &str, sender_id: &str, sender_name: &str, content: &str) -> Self {
        Self::new(room_id, sender_id, sender_name, content, MessageKind::User)
    }

    /// A message authored by the AI participant.
    pub fn ai(room_id: &str, content: &str) -> Self {
        Self::new(
            room_id,
            AI_SENDER_ID,
            AI_SENDER_NAME,
            content,
            MessageKind::Ai,
        )
    }

    /// A relay-generated system message.
    pub fn system(room_id: &str, content: &str) -> Self {
        Self::new(
            room_id,
            SYSTEM_SENDER_ID,
            SYSTEM_SENDER_NAME,
            content,
            MessageKind::System,
        )
    }
}

/// One entry in a room's presence list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveUser {
    pub user_id: String,
    pub username: String,
}

impl ActiveUser {
    /// The synthetic entry for the AI participant, listed first whenever
    /// at least one human is present.
    pub fn ai() -> Self {
        Self {
            user_id: AI_SENDER_ID.to_string(),
            username: AI_SENDER_NAME.to_string(),
        }
    }
}
