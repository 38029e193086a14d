// ABOUTME: Integration tests for the chat orchestrator.
// ABOUTME: Uses a mock ResponseGenerator and mpsc transports; asserts on delivered frames.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use styx_core::events::ServerFrame;
use styx_core::history::MessageStore;
use styx_core::message::{MessageKind, AI_SENDER_ID};
use styx_core::orchestrator::{ChatOrchestrator, OrchestratorConfig};
use styx_core::registry::{ConnectionId, ConnectionRegistry};
use styx_core::rooms::{NewRoom, RoomPatch, RoomStore};
use styx_core::traits::{AuthenticatedUser, GenerationRequest, ResponseGenerator};
use styx_core::trigger::TriggerDetector;
use styx_core::policy::Role;
use tokio::sync::mpsc;

type Rx = mpsc::Receiver<ServerFrame>;

/// Mock generator that records every request and returns either a canned
/// reply or an error.
struct MockGenerator {
    reply: Option<String>,
    requests: Arc<Mutex<Vec<GenerationRequest>>>,
}

impl MockGenerator {
    fn replying(reply: &str) -> (Arc<Self>, Arc<Mutex<Vec<GenerationRequest>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let generator = Arc::new(Self {
            reply: Some(reply.to_string()),
            requests: Arc::clone(&requests),
        });
        (generator, requests)
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

#[async_trait]
impl ResponseGenerator for MockGenerator {
    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<String> {
        self.requests.lock().unwrap().push(request);
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => anyhow::bail!("backend timeout"),
        }
    }
}

struct Harness {
    orchestrator: ChatOrchestrator,
    registry: Arc<ConnectionRegistry>,
    store: Arc<MessageStore>,
    rooms: RoomStore,
}

fn harness(generator: Arc<dyn ResponseGenerator>) -> Harness {
    let registry = Arc::new(ConnectionRegistry::new());
    let store = Arc::new(MessageStore::new(100));
    let rooms = RoomStore::in_memory().unwrap();
    rooms
        .create_room(NewRoom {
            room_id: "general".to_string(),
            name: "General Chat".to_string(),
            ..NewRoom::default()
        })
        .unwrap();

    let orchestrator = ChatOrchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        rooms.clone(),
        TriggerDetector::with_defaults(),
        generator,
        OrchestratorConfig::default(),
    );
    Harness {
        orchestrator,
        registry,
        store,
        rooms,
    }
}

fn user(user_id: &str, username: &str) -> AuthenticatedUser {
    AuthenticatedUser {
        user_id: user_id.to_string(),
        username: username.to_string(),
        role: Role::User,
        is_restricted_account: false,
    }
}

async fn connect(h: &Harness, user_id: &str, username: &str) -> (ConnectionId, Rx) {
    let (tx, mut rx) = mpsc::channel(64);
    let id = h
        .orchestrator
        .connect_user(tx, &user(user_id, username), "general")
        .await;
    drain(&mut rx); // discard the join handshake frames
    (id, rx)
}

fn drain(rx: &mut Rx) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn test_empty_content_is_a_no_op() {
    let h = harness(MockGenerator::failing());
    let (_, mut rx) = connect(&h, "u1", "alice").await;

    h.orchestrator.handle_inbound("u1", "general", "   ").await;

    assert!(drain(&mut rx).is_empty());
    assert_eq!(h.store.message_count("general").await, 0);
}

#[tokio::test]
async fn test_help_goes_to_sender_only_and_is_not_persisted() {
    let h = harness(MockGenerator::failing());
    let (_, mut alice_rx) = connect(&h, "u1", "alice").await;
    let (_, mut bob_rx) = connect(&h, "u2", "bob").await;
    drain(&mut alice_rx); // bob's join events

    h.orchestrator.handle_inbound("u1", "general", "!HELP").await;

    let frames = drain(&mut alice_rx);
    assert_eq!(frames.len(), 1);
    match &frames[0] {
        ServerFrame::MessageReceived(msg) => {
            assert_eq!(msg.kind, MessageKind::System);
            assert!(msg.content.contains("!help"));
        }
        other => panic!("Expected system message, got {:?}", other),
    }
    assert!(drain(&mut bob_rx).is_empty());
    assert_eq!(h.store.message_count("general").await, 0);
}

#[tokio::test]
async fn test_plain_message_is_persisted_and_broadcast() {
    let h = harness(MockGenerator::failing());
    let (_, mut alice_rx) = connect(&h, "u1", "alice").await;
    let (_, mut bob_rx) = connect(&h, "u2", "bob").await;
    drain(&mut alice_rx);

    h.orchestrator
        .handle_inbound("u1", "general", "good morning")
        .await;

    for rx in [&mut alice_rx, &mut bob_rx] {
        let frames = drain(rx);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0],
            ServerFrame::MessageReceived(msg)
                if msg.content == "good morning" && msg.kind == MessageKind::User
        ));
    }
    assert_eq!(h.store.message_count("general").await, 1);
}

#[tokio::test]
async fn test_trigger_produces_typing_reply_typing_sequence() {
    let (generator, requests) = MockGenerator::replying("Hello alice!");
    let h = harness(generator);
    let (_, mut rx) = connect(&h, "u1", "alice").await;

    h.orchestrator
        .handle_inbound("u1", "general", "Hey Styx, what's up?")
        .await;

    let frames = drain(&mut rx);
    assert!(matches!(
        &frames[0],
        ServerFrame::MessageReceived(msg) if msg.kind == MessageKind::User
    ));
    assert!(matches!(frames[1], ServerFrame::AiTyping { typing: true }));
    match &frames[2] {
        ServerFrame::MessageReceived(msg) => {
            assert_eq!(msg.kind, MessageKind::Ai);
            assert_eq!(msg.sender_id, AI_SENDER_ID);
            assert_eq!(msg.content, "Hello alice!");
        }
        other => panic!("Expected AI message, got {:?}", other),
    }
    assert!(matches!(frames[3], ServerFrame::AiTyping { typing: false }));

    // Both the user message and the AI reply are persisted.
    assert_eq!(h.store.message_count("general").await, 2);

    // The triggering message is trimmed from the history handed onward.
    let recorded = requests.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].message, "Hey Styx, what's up?");
    assert!(recorded[0].history.is_empty());
}

#[tokio::test]
async fn test_history_keeps_earlier_messages_but_not_the_trigger() {
    let (generator, requests) = MockGenerator::replying("sure");
    let h = harness(generator);
    let (_, _rx) = connect(&h, "u1", "alice").await;

    h.orchestrator
        .handle_inbound("u1", "general", "setting some context")
        .await;
    h.orchestrator
        .handle_inbound("u1", "general", "@styx can you help")
        .await;

    let recorded = requests.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    let history: Vec<&str> = recorded[0]
        .history
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(history, vec!["setting some context"]);
}

#[tokio::test]
async fn test_generation_failure_still_clears_typing_indicator() {
    let h = harness(MockGenerator::failing());
    let (_, mut rx) = connect(&h, "u1", "alice").await;

    h.orchestrator
        .handle_inbound("u1", "general", "@styx are you there")
        .await;

    let frames = drain(&mut rx);
    assert!(matches!(
        &frames[0],
        ServerFrame::MessageReceived(msg) if msg.kind == MessageKind::User
    ));
    assert!(matches!(frames[1], ServerFrame::AiTyping { typing: true }));
    assert!(matches!(frames[2], ServerFrame::AiTyping { typing: false }));
    assert_eq!(frames.len(), 3);
    // No AI message was emitted.
    assert_eq!(h.store.message_count("general").await, 1);
}

#[tokio::test]
async fn test_room_overrides_reach_the_generator() {
    let (generator, requests) = MockGenerator::replying("ok");
    let h = harness(generator);
    h.rooms
        .update_room(
            "general",
            RoomPatch {
                ai_prompt: Some("pirate speak only".to_string()),
                ai_model: Some("tiny-model".to_string()),
                ..RoomPatch::default()
            },
        )
        .unwrap();
    let (_, _rx) = connect(&h, "u1", "alice").await;

    h.orchestrator
        .handle_inbound("u1", "general", "hey styx hello")
        .await;

    let recorded = requests.lock().unwrap();
    assert_eq!(
        recorded[0].prompt_override.as_deref(),
        Some("pirate speak only")
    );
    assert_eq!(recorded[0].model_override.as_deref(), Some("tiny-model"));
}

#[tokio::test]
async fn test_non_trigger_message_never_calls_the_generator() {
    let (generator, requests) = MockGenerator::replying("should not happen");
    let h = harness(generator);
    let (_, _rx) = connect(&h, "u1", "alice").await;

    h.orchestrator
        .handle_inbound("u1", "general", "mystyx is cool")
        .await;

    assert!(requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_content_is_rejected_with_error_frame() {
    let h = harness(MockGenerator::failing());
    let (_, mut rx) = connect(&h, "u1", "alice").await;

    let oversized = "x".repeat(2001);
    h.orchestrator
        .handle_inbound("u1", "general", &oversized)
        .await;

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], ServerFrame::Error { .. }));
    assert_eq!(h.store.message_count("general").await, 0);
}

#[tokio::test]
async fn test_typing_relays_to_other_members_only() {
    let h = harness(MockGenerator::failing());
    let (_, mut alice_rx) = connect(&h, "u1", "alice").await;
    let (_, mut bob_rx) = connect(&h, "u2", "bob").await;
    drain(&mut alice_rx);

    h.orchestrator
        .handle_frame(
            "u1",
            "general",
            styx_core::events::ClientFrame::Typing { typing: true },
        )
        .await;

    assert!(drain(&mut alice_rx).is_empty());
    let frames = drain(&mut bob_rx);
    assert!(matches!(
        &frames[0],
        ServerFrame::UserTyping { username, typing: true, .. } if username == "alice"
    ));
}

#[tokio::test]
async fn test_delete_room_disconnects_members_before_removing_state() {
    let h = harness(MockGenerator::failing());
    let (_, _alice_rx) = connect(&h, "u1", "alice").await;
    let (_, _bob_rx) = connect(&h, "u2", "bob").await;
    h.orchestrator
        .handle_inbound("u1", "general", "to be deleted")
        .await;

    assert!(h.orchestrator.delete_room("general").await.unwrap());

    assert!(h.registry.connection_info("u1").await.is_none());
    assert!(h.registry.connection_info("u2").await.is_none());
    assert!(h.registry.room_members("general").await.is_empty());
    assert_eq!(h.store.message_count("general").await, 0);
    assert!(h.rooms.get_room("general").unwrap().is_none());

    // Deleting again reports absent without failing.
    assert!(!h.orchestrator.delete_room("general").await.unwrap());
}

#[tokio::test]
async fn test_clear_messages_keeps_the_room() {
    let h = harness(MockGenerator::failing());
    let (_, _rx) = connect(&h, "u1", "alice").await;
    h.orchestrator.handle_inbound("u1", "general", "one").await;
    h.orchestrator.handle_inbound("u1", "general", "two").await;

    assert_eq!(h.orchestrator.clear_messages("general").await, 2);
    assert_eq!(h.store.message_count("general").await, 0);
    assert!(h.rooms.get_room("general").unwrap().is_some());
}
