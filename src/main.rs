// ABOUTME: Main entry point for the Styx chat relay
// ABOUTME: Initializes logging, config, stores, the orchestrator, and the HTTP/WebSocket server

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use styx::ai::AiClient;
use styx::auth::TokenAuthenticator;
use styx::config::Config;
use styx::server::{self, AppState};
use styx_core::history::MessageStore;
use styx_core::orchestrator::{ChatOrchestrator, OrchestratorConfig};
use styx_core::policy::AccessPolicy;
use styx_core::registry::ConnectionRegistry;
use styx_core::rooms::RoomStore;
use styx_core::traits::{Authenticator, ResponseGenerator};
use styx_core::trigger::TriggerDetector;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "styx", about = "Multi-room chat relay with an embedded AI participant")]
struct Args {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    /// Override the listen port from config
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC! Relay crashed with the following error:\n{}", panic_info);
        eprintln!(
            "\nBacktrace:\n{:?}",
            std::backtrace::Backtrace::force_capture()
        );
    }));

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Styx chat relay");

    // Load configuration
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let mut config = Config::load_from(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        data_dir = %config.storage.data_dir,
        model_url = %config.ai.model_url,
        users = config.auth.users.len(),
        "Configuration loaded"
    );

    // Initialize Prometheus metrics
    let metrics_handle = styx::metrics::init_metrics()?;

    // Initialize stores
    let rooms = RoomStore::new(&config.storage.data_dir)?;
    rooms.ensure_default_room(&config.chat.default_room_id, &config.chat.default_room_name)?;
    tracing::info!(room_id = %config.chat.default_room_id, "Default room ensured");

    let store = Arc::new(MessageStore::new(config.chat.history_cap));
    let registry = Arc::new(ConnectionRegistry::new());
    let policy = AccessPolicy::new(config.chat.default_room_id.clone());
    let detector = TriggerDetector::new(&config.chat.triggers)?;

    // Collaborators supplied to the orchestrator at construction
    let ai = Arc::new(AiClient::new(&config.ai)?);
    let auth: Arc<dyn Authenticator> =
        Arc::new(TokenAuthenticator::from_entries(&config.auth.users)?);

    let orchestrator = Arc::new(ChatOrchestrator::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        rooms.clone(),
        detector,
        Arc::clone(&ai) as Arc<dyn ResponseGenerator>,
        OrchestratorConfig {
            history_replay: config.chat.history_replay,
            context_window: config.chat.context_window,
            max_message_length: config.chat.max_message_length,
        },
    ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        config: Arc::new(config),
        registry,
        store,
        rooms,
        policy,
        orchestrator,
        auth,
        ai,
        metrics: metrics_handle,
    };

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Relay ready - accepting connections");

    axum::serve(listener, server::router(state))
        .await
        .context("Server terminated")?;
    Ok(())
}
