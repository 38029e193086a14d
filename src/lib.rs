// ABOUTME: Root library module exposing the transport-surface modules
// ABOUTME: Provides access to config, auth, AI client, server, and websocket modules

pub mod ai;
pub mod auth;
pub mod config;
pub mod metrics;
pub mod server;
pub mod ws;

// Re-export platform-agnostic modules from styx-core
pub use styx_core::events;
pub use styx_core::history;
pub use styx_core::message;
pub use styx_core::orchestrator;
pub use styx_core::policy;
pub use styx_core::registry;
pub use styx_core::rooms;
pub use styx_core::traits;
pub use styx_core::trigger;
