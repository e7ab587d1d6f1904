//! Chat completion client abstraction.
//!
//! Defines the [`CompletionClient`] trait used by every model-backed stage
//! (classification, SQL generation, summarization, answer composition) and
//! an OpenAI-compatible HTTP implementation. Any gateway exposing
//! `POST {base_url}/chat/completions` (OpenAI, LiteLLM proxy, vLLM, Ollama's
//! OpenAI endpoint) works.
//!
//! No retries are performed here: a transport or API failure is returned to
//! the caller and ends the request. Timeouts come from [`LlmConfig`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: model.into(),
            temperature: 0.0,
            max_tokens: 2048,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token accounting reported by the completion service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Completion text plus the metadata the service returned with it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub model: String,
    pub usage: Usage,
}

/// A chat completion backend.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one completion and return the text with usage metadata.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// Run a completion and keep only the text.
pub async fn complete_text(
    client: &dyn CompletionClient,
    request: &CompletionRequest,
) -> Result<String> {
    let completion = client.complete(request).await?;
    tracing::debug!(
        model = %completion.model,
        prompt_tokens = completion.usage.prompt_tokens,
        completion_tokens = completion.usage.completion_tokens,
        output_len = completion.content.len(),
        "llm completion"
    );
    Ok(completion.content)
}

// ============ OpenAI-compatible client ============

/// Completion client for OpenAI-compatible chat APIs.
///
/// Reads the bearer token from `OPENAI_API_KEY` when present; gateways
/// that need no key (local proxies) work without it.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = serde_json::json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("completion request to {} failed", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Completion API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json, &request.model)
    }
}

/// Parse an OpenAI chat completion response.
///
/// A `null` message content (e.g. a refusal or tool call) is treated as
/// empty text rather than an error.
fn parse_chat_response(json: &serde_json::Value, requested_model: &str) -> Result<Completion> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices"))?;

    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let model = json
        .get("model")
        .and_then(|m| m.as_str())
        .unwrap_or(requested_model)
        .to_string();

    let usage = json
        .get("usage")
        .cloned()
        .map(serde_json::from_value::<Usage>)
        .transpose()
        .unwrap_or_default()
        .unwrap_or_default();

    Ok(Completion {
        content,
        model,
        usage,
    })
}

/// Create the completion client described by the configuration.
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn CompletionClient>> {
    Ok(Box::new(OpenAiClient::new(config)?))
}
