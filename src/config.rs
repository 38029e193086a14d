// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates required fields and provides sensible defaults for optional ones
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use styx_core::policy::Role;
use styx_core::trigger::DEFAULT_TRIGGERS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_model_url")]
    pub model_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_ai_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Retained messages per room; the oldest overflow is evicted.
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// Messages replayed to a joining user.
    #[serde(default = "default_history_replay")]
    pub history_replay: usize,
    /// History window handed to the AI collaborator.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    #[serde(default = "default_room_id")]
    pub default_room_id: String,
    #[serde(default = "default_room_name")]
    pub default_room_name: String,
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

/// One entry in the token table handed to the auth collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub token: String,
    pub user_id: String,
    pub username: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub restricted: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_model_url() -> String {
    "http://localhost:1234".to_string()
}

fn default_model() -> String {
    "meta-llama-3.1-8b-instruct".to_string()
}

fn default_ai_timeout() -> u64 {
    30
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    512
}

fn default_history_cap() -> usize {
    100
}

fn default_history_replay() -> usize {
    50
}

fn default_context_window() -> usize {
    10
}

fn default_max_message_length() -> usize {
    2000
}

fn default_room_id() -> String {
    "general".to_string()
}

fn default_room_name() -> String {
    "General Chat".to_string()
}

fn default_triggers() -> Vec<String> {
    DEFAULT_TRIGGERS.iter().map(|s| s.to_string()).collect()
}

fn default_role() -> String {
    "user".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model_url: default_model_url(),
            api_key: None,
            model: default_model(),
            timeout_secs: default_ai_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_cap: default_history_cap(),
            history_replay: default_history_replay(),
            context_window: default_context_window(),
            max_message_length: default_max_message_length(),
            default_room_id: default_room_id(),
            default_room_name: default_room_name(),
            triggers: default_triggers(),
        }
    }
}

impl Config {
    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Load configuration from the given path. A missing file yields the
    /// defaults; env overrides and validation apply either way.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            Config {
                server: ServerConfig::default(),
                storage: StorageConfig::default(),
                ai: AiConfig::default(),
                chat: ChatConfig::default(),
                auth: AuthConfig::default(),
            }
        };

        // Override with environment variables if present
        if let Ok(val) = std::env::var("SERVER_HOST") {
            config.server.host = val;
        }
        if let Ok(val) = std::env::var("SERVER_PORT") {
            config.server.port = val.parse().with_context(|| {
                format!("SERVER_PORT must be a valid port number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("ALLOWED_ORIGINS") {
            config.server.allowed_origins = val
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(val) = std::env::var("DATA_DIR") {
            config.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("AI_MODEL_URL") {
            config.ai.model_url = val;
        }
        if let Ok(val) = std::env::var("AI_API_KEY") {
            config.ai.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("AI_MODEL") {
            config.ai.model = val;
        }
        if let Ok(val) = std::env::var("AI_RESPONSE_TIMEOUT") {
            config.ai.timeout_secs = val
                .parse()
                .with_context(|| format!("AI_RESPONSE_TIMEOUT must be seconds, got: {}", val))?;
        }
        if let Ok(val) = std::env::var("MAX_CHAT_HISTORY") {
            config.chat.history_cap = val
                .parse()
                .with_context(|| format!("MAX_CHAT_HISTORY must be a count, got: {}", val))?;
        }
        if let Ok(val) = std::env::var("MAX_MESSAGE_LENGTH") {
            config.chat.max_message_length = val
                .parse()
                .with_context(|| format!("MAX_MESSAGE_LENGTH must be a count, got: {}", val))?;
        }

        // Validate required fields
        if config.ai.model_url.trim().is_empty() {
            anyhow::bail!("ai.model_url is required (set in config.toml or AI_MODEL_URL env var)");
        }
        if config.chat.default_room_id.trim().is_empty() {
            anyhow::bail!("chat.default_room_id must not be empty");
        }
        if config.auth.users.is_empty() {
            anyhow::bail!("auth.users must contain at least one user entry");
        }

        let mut seen_tokens = HashSet::new();
        for user in &config.auth.users {
            if user.token.trim().is_empty()
                || user.user_id.trim().is_empty()
                || user.username.trim().is_empty()
            {
                anyhow::bail!(
                    "auth.users entries need non-empty token, user_id, and username (user_id: {:?})",
                    user.user_id
                );
            }
            Role::from_str(&user.role)
                .with_context(|| format!("Invalid role for user {}", user.user_id))?;
            if !seen_tokens.insert(user.token.as_str()) {
                anyhow::bail!("Duplicate token in auth.users (user_id: {})", user.user_id);
            }
        }

        Ok(config)
    }
}
