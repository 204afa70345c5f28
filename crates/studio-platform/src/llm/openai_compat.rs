//! OpenAI-compatible LLM adapter.
//!
//! Works with Gemini's OpenAI endpoint, OpenAI, Ollama and any provider
//! using the OpenAI chat completions API format.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use studio_core::ports::LlmClient;
use studio_types::{
    AgentError, Result,
    config::LlmConfig,
    message::{Message, Role},
};

/// One conversation against a chat completions endpoint.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    config: LlmConfig,
    base_url: String,
    history: Mutex<Vec<Message>>,
}

impl OpenAiCompatClient {
    pub fn new(http: reqwest::Client, config: LlmConfig, history: Vec<Message>) -> Self {
        let base_url = config
            .api_base
            .clone()
            .unwrap_or_else(|| config.provider.default_base_url().to_string());
        Self {
            http,
            config,
            base_url: base_url.trim_end_matches('/').to_string(),
            history: Mutex::new(history),
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn build_request_body(&self, messages: &[Message]) -> Value {
        let messages: Vec<Value> = messages.iter().map(message_to_json).collect();
        json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        })
    }

    async fn chat_completion(&self, messages: &[Message]) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request_body(messages);

        let mut request = self.http.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(AgentError::Llm(format!("HTTP {}: {}", status, text)));
        }

        let data: ApiResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;
        reply_text(data)
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn prompt(&self, text: &str) -> Result<String> {
        let mut messages = self.history();
        messages.push(Message::user(text));

        let reply = self.chat_completion(&messages).await?;

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push(Message::user(text));
        history.push(Message::model(&reply));
        Ok(reply)
    }

    async fn generate_content(&self, parts: &[String]) -> Result<String> {
        let messages = [Message::user(parts.join("\n"))];
        self.chat_completion(&messages).await
    }

    fn history(&self) -> Vec<Message> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ─── API response types ──────────────────────────────────────

#[derive(Deserialize)]
pub(crate) struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

// ─── Serialization helpers ───────────────────────────────────

pub(crate) fn message_to_json(msg: &Message) -> Value {
    let role = match msg.role {
        Role::User => "user",
        Role::Model => "assistant",
    };
    json!({
        "role": role,
        "content": msg.content,
    })
}

pub(crate) fn reply_text(data: ApiResponse) -> Result<String> {
    let choice = data
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AgentError::Llm("No choices in response".to_string()))?;
    choice
        .message
        .content
        .ok_or_else(|| AgentError::Llm("Empty message in response".to_string()))
}
