// ABOUTME: Platform-agnostic chat relay core: presence, history, policy, triggers, orchestration.
// ABOUTME: The transport crate supplies the collaborators (auth, AI generation) via traits.

pub mod error;
pub mod events;
pub mod history;
pub mod message;
pub mod orchestrator;
pub mod policy;
pub mod registry;
pub mod rooms;
pub mod traits;
pub mod trigger;

// Re-export the types most callers need
pub use error::ConnectRefusal;
pub use events::{ClientFrame, ServerFrame};
pub use history::{MessageStore, DEFAULT_HISTORY_CAP};
pub use message::{ActiveUser, ChatMessage, MessageKind};
pub use orchestrator::{ChatOrchestrator, OrchestratorConfig, HELP_COMMAND};
pub use policy::{AccessPolicy, Role};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionState, FrameSender};
pub use rooms::{NewRoom, Room, RoomPatch, RoomStore};
pub use traits::{AuthenticatedUser, Authenticator, GenerationRequest, ResponseGenerator};
pub use trigger::{TriggerDetector, DEFAULT_TRIGGERS};
