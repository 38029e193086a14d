// ABOUTME: Composes registry, stores, policy, and trigger detection into the chat flow.
// ABOUTME: Each inbound event flows transport -> orchestrator -> stores/detector -> broadcast.

use std::sync::Arc;

use anyhow::Result;

use crate::events::{ClientFrame, ServerFrame};
use crate::history::MessageStore;
use crate::message::ChatMessage;
use crate::registry::{ConnectionId, ConnectionRegistry, FrameSender};
use crate::rooms::RoomStore;
use crate::traits::{AuthenticatedUser, GenerationRequest, ResponseGenerator};
use crate::trigger::TriggerDetector;

/// The one reserved chat command; matched case-insensitively against the
/// whole message.
pub const HELP_COMMAND: &str = "!help";

/// Orchestrator tunables, split out so construction sites stay readable.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Messages replayed to a joining user.
    pub history_replay: usize,
    /// History window handed to the AI collaborator.
    pub context_window: usize,
    /// Hard cap on inbound content length, in characters.
    pub max_message_length: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_replay: 50,
            context_window: 10,
            max_message_length: 2000,
        }
    }
}

/// Ingests inbound events, persists and fans out messages, and drives the
/// AI collaborator when a trigger fires. All collaborators are supplied at
/// construction; the orchestrator holds no hidden global state.
pub struct ChatOrchestrator {
    registry: Arc<ConnectionRegistry>,
    store: Arc<MessageStore>,
    rooms: RoomStore,
    detector: TriggerDetector,
    generator: Arc<dyn ResponseGenerator>,
    config: OrchestratorConfig,
}

impl ChatOrchestrator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<MessageStore>,
        rooms: RoomStore,
        detector: TriggerDetector,
        generator: Arc<dyn ResponseGenerator>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            rooms,
            detector,
            generator,
            config,
        }
    }

    /// Admit an authenticated user: fetch the replay window, then hand the
    /// connection to the registry. History is read before any registry
    /// lock is taken.
    pub async fn connect_user(
        &self,
        sender: FrameSender,
        user: &AuthenticatedUser,
        room_id: &str,
    ) -> ConnectionId {
        let history = self
            .store
            .get_recent(room_id, self.config.history_replay)
            .await;
        self.registry
            .connect(sender, &user.user_id, &user.username, room_id, history)
            .await
    }

    pub async fn disconnect_user(&self, user_id: &str, id: ConnectionId) {
        self.registry.disconnect_exact(user_id, id).await;
    }

    /// Entry point for frames already decoded at the transport boundary.
    pub async fn handle_frame(&self, user_id: &str, room_id: &str, frame: ClientFrame) {
        match frame {
            ClientFrame::SendMessage { content } => {
                self.handle_inbound(user_id, room_id, &content).await;
            }
            ClientFrame::Typing { typing } => {
                self.handle_typing(user_id, room_id, typing).await;
            }
        }
    }

    /// Process one chat message from a user.
    pub async fn handle_inbound(&self, user_id: &str, room_id: &str, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let Some(info) = self.registry.connection_info(user_id).await else {
            return;
        };

        if content.chars().count() > self.config.max_message_length {
            self.registry
                .send_to_user(
                    user_id,
                    ServerFrame::Error {
                        error: format!(
                            "Message too long (max {} characters)",
                            self.config.max_message_length
                        ),
                    },
                )
                .await;
            return;
        }

        if content.eq_ignore_ascii_case(HELP_COMMAND) {
            // Delivered to the sender only; neither persisted nor broadcast.
            let help = ChatMessage::system(room_id, &self.help_text());
            self.registry
                .send_to_user(user_id, ServerFrame::MessageReceived(help))
                .await;
            return;
        }

        let message = ChatMessage::user(room_id, user_id, &info.username, content);

        // Persistence and broadcast are independent best-effort steps; the
        // store never blocks the fan-out.
        self.store.store(message.clone()).await;
        self.registry
            .broadcast_to_room(room_id, ServerFrame::MessageReceived(message), None)
            .await;

        if self.detector.should_trigger(content) {
            self.run_ai_exchange(room_id, content, &info.username).await;
        }
    }

    /// Drive one AI reply. The typing indicator is cleared on every path,
    /// including generation failure.
    async fn run_ai_exchange(&self, room_id: &str, content: &str, username: &str) {
        self.registry
            .broadcast_to_room(room_id, ServerFrame::AiTyping { typing: true }, None)
            .await;

        match self.generate_reply(room_id, content, username).await {
            Ok(reply) => {
                metrics::counter!("styx_ai_generations_total", "outcome" => "success")
                    .increment(1);
                let message = ChatMessage::ai(room_id, &reply);
                self.store.store(message.clone()).await;
                self.registry
                    .broadcast_to_room(room_id, ServerFrame::MessageReceived(message), None)
                    .await;
            }
            Err(e) => {
                metrics::counter!("styx_ai_generations_total", "outcome" => "failure")
                    .increment(1);
                tracing::error!(room_id = %room_id, error = %e, "AI generation failed");
            }
        }

        self.registry
            .broadcast_to_room(room_id, ServerFrame::AiTyping { typing: false }, None)
            .await;
    }

    async fn generate_reply(&self, room_id: &str, content: &str, username: &str) -> Result<String> {
        // Room overrides are read outside any registry lock; a metadata
        // read failure just means no overrides.
        let (prompt_override, model_override) = match self.rooms.get_room(room_id) {
            Ok(Some(room)) => (room.ai_prompt, room.ai_model),
            Ok(None) => (None, None),
            Err(e) => {
                tracing::warn!(room_id = %room_id, error = %e, "Room lookup failed, using defaults");
                (None, None)
            }
        };

        let mut history = self
            .store
            .get_recent(room_id, self.config.context_window)
            .await;
        // The triggering message was just persisted; drop it from the tail
        // so the collaborator does not see it twice.
        if history
            .last()
            .is_some_and(|m| m.sender_name == username && m.content == content)
        {
            history.pop();
        }

        self.generator
            .generate(GenerationRequest {
                message: content.to_string(),
                username: username.to_string(),
                history,
                prompt_override,
                model_override,
            })
            .await
    }

    /// Relay a typing indicator to the other members of the room.
    async fn handle_typing(&self, user_id: &str, room_id: &str, typing: bool) {
        let Some(info) = self.registry.connection_info(user_id).await else {
            return;
        };
        self.registry
            .broadcast_to_room(
                room_id,
                ServerFrame::UserTyping {
                    user_id: user_id.to_string(),
                    username: info.username,
                    typing,
                },
                Some(user_id),
            )
            .await;
    }

    /// Clear a room's message history (admin surface).
    pub async fn clear_messages(&self, room_id: &str) -> usize {
        let cleared = self.store.clear_room(room_id).await;
        tracing::info!(room_id = %room_id, cleared, "Cleared room messages");
        cleared
    }

    /// Tear down a room: every live member is disconnected with the normal
    /// side effects before any persisted state is removed.
    pub async fn delete_room(&self, room_id: &str) -> Result<bool> {
        for user_id in self.registry.room_members(room_id).await {
            self.registry.disconnect(&user_id).await;
        }
        let cleared = self.store.clear_room(room_id).await;
        let deleted = self.rooms.delete_room(room_id)?;
        if deleted {
            tracing::info!(room_id = %room_id, cleared, "Room deleted");
        }
        Ok(deleted)
    }

    fn help_text(&self) -> String {
        "Styx chat help:\n\
         \n\
         Type naturally to chat with the other people in the room.\n\
         !help                       — Show this help\n\
         \n\
         Ask the AI assistant by mentioning it:\n\
         @ai, @bot, @styx            — Mention-style triggers\n\
         hey ai, hey styx            — Phrase-style triggers\n\
         \n\
         Example: \"Hey Styx, what's the weather like?\"\n\
         Styx sees the recent room history and answers in the room."
            .to_string()
    }
}
