// ABOUTME: Collaborator seams consumed by the chat core.
// ABOUTME: ResponseGenerator produces AI replies; Authenticator resolves connection credentials.

use anyhow::Result;
use async_trait::async_trait;

use crate::message::ChatMessage;
use crate::policy::Role;

/// Everything the AI collaborator needs to produce one reply.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The message that triggered the exchange.
    pub message: String,
    /// Display name of the triggering user.
    pub username: String,
    /// Recent room history, oldest first, with the triggering message
    /// already removed.
    pub history: Vec<ChatMessage>,
    /// Room-specific system prompt, if the room overrides the default.
    pub prompt_override: Option<String>,
    /// Room-specific model, if the room overrides the default.
    pub model_override: Option<String>,
}

/// AI generation collaborator. Implementations enforce their own timeout
/// budget; a timeout or backend error surfaces as a plain error and is
/// never fatal to a connection or a room.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String>;
}

/// Resolved identity for an admitted connection. The core trusts this
/// tuple as-is and never re-validates credentials.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub username: String,
    pub role: Role,
    pub is_restricted_account: bool,
}

/// Auth collaborator: maps an opaque token to a user, or `None` when the
/// token is unknown.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Option<AuthenticatedUser>>;
}
