// ABOUTME: Wire envelopes for the WebSocket boundary.
// ABOUTME: Inbound ClientFrame and outbound ServerFrame are closed tagged unions, decoded once at the edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ActiveUser, ChatMessage};

/// Frames sent by a connected client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    SendMessage { content: String },
    Typing { typing: bool },
}

/// Frames delivered to connected clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A live message, fanned out to the whole room.
    MessageReceived(ChatMessage),
    /// A replayed message, sent only to a joining user.
    MessageHistory(ChatMessage),
    UserJoined {
        user_id: String,
        username: String,
        timestamp: DateTime<Utc>,
    },
    UserLeft {
        user_id: String,
        username: String,
        timestamp: DateTime<Utc>,
    },
    UserListUpdated {
        active_users: Vec<ActiveUser>,
    },
    UserTyping {
        user_id: String,
        username: String,
        typing: bool,
    },
    AiTyping {
        typing: bool,
    },
    ConnectionEstablished {
        user_id: String,
        room_id: String,
        active_users: Vec<ActiveUser>,
    },
    Error {
        error: String,
    },
}
