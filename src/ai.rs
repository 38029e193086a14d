// ABOUTME: OpenAI-compatible chat-completions client used as the AI generation collaborator.
// ABOUTME: Builds the Styx system prompt, maps room history to roles, and enforces the request timeout.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use styx_core::message::MessageKind;
use styx_core::traits::{GenerationRequest, ResponseGenerator};

use crate::config::AiConfig;

/// How many history entries are folded into the conversation context.
const CONTEXT_MESSAGES: usize = 8;

pub struct AiClient {
    http: reqwest::Client,
    model_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatTurn>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatTurn {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

impl AiClient {
    pub fn new(config: &AiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build AI HTTP client")?;
        tracing::info!(model_url = %config.model_url, model = %config.model, "AI client initialized");
        Ok(Self {
            http,
            model_url: config.model_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn default_model(&self) -> &str {
        &self.model
    }

    /// Chat-capable model ids advertised by the backend; embedding models
    /// are filtered out.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let mut request = self.http.get(format!("{}/v1/models", self.model_url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.context("Model list request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("Model list request returned {}", response.status());
        }
        let list: ModelList = response
            .json()
            .await
            .context("Invalid model list payload")?;
        Ok(list
            .data
            .into_iter()
            .map(|m| m.id)
            .filter(|id| !id.to_lowercase().contains("embed"))
            .collect())
    }

    fn system_prompt(&self, room_prompt: Option<&str>) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S");
        match room_prompt {
            Some(room_prompt) => format!(
                "You are Styx, an AI assistant participating in this chat room.\n\
                 \n\
                 Room-specific instructions:\n{room_prompt}\n\
                 \n\
                 Basic guidelines:\n\
                 - Your name is Styx - use this if you need to refer to yourself\n\
                 - Keep responses concise unless the room instructions say otherwise\n\
                 - You can see the chat history and respond to the current conversation\n\
                 - Address users by name when appropriate\n\
                 - Current time: {now}\n\
                 \n\
                 Follow the room-specific instructions above while keeping the conversation natural."
            ),
            None => format!(
                "You are Styx, a helpful AI assistant participating in a group chat.\n\
                 \n\
                 Guidelines:\n\
                 - Be friendly, engaging, and conversational\n\
                 - Keep responses concise but informative (2-3 sentences unless asked for details)\n\
                 - You can see the chat history and respond to the current conversation\n\
                 - Address users by name when appropriate\n\
                 - Your name is Styx - use this if you need to refer to yourself\n\
                 - Don't overly mention that you're an AI unless asked\n\
                 \n\
                 Current time: {now}\n\
                 \n\
                 Respond naturally as if you're another participant in the chat."
            ),
        }
    }

    fn build_context(&self, request: &GenerationRequest) -> Vec<ChatTurn> {
        let mut turns = vec![ChatTurn {
            role: "system",
            content: self.system_prompt(request.prompt_override.as_deref()),
        }];

        let tail_start = request.history.len().saturating_sub(CONTEXT_MESSAGES);
        for message in &request.history[tail_start..] {
            match message.kind {
                MessageKind::User => turns.push(ChatTurn {
                    role: "user",
                    content: format!("{}: {}", message.sender_name, message.content),
                }),
                MessageKind::Ai => turns.push(ChatTurn {
                    role: "assistant",
                    content: message.content.clone(),
                }),
                // System notices are relay chrome, not conversation.
                MessageKind::System => {}
            }
        }

        turns.push(ChatTurn {
            role: "user",
            content: format!("{}: {}", request.username, request.message),
        });
        turns
    }
}

#[async_trait]
impl ResponseGenerator for AiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let model = request.model_override.as_deref().unwrap_or(&self.model);
        tracing::debug!(model = %model, username = %request.username, "Requesting AI completion");

        let payload = ChatCompletionRequest {
            model,
            messages: self.build_context(&request),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut http_request = self
            .http
            .post(format!("{}/v1/chat/completions", self.model_url))
            .json(&payload);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request
            .send()
            .await
            .context("AI completion request failed")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("AI backend returned {}: {}", status, body);
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .context("Invalid AI completion payload")?;
        let reply = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .context("AI backend returned no content")?;

        tracing::info!(
            username = %request.username,
            reply_len = reply.len(),
            "Generated AI response"
        );
        Ok(reply)
    }
}
