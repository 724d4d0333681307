//! OpenAI-style chat-completion adapter (§4.1, C1 wire variant 1/3).
//!
//! Grounded on the teacher's OpenAI-compatible adapter shape (a `reqwest`
//! client built once, reused across calls, with bearer auth and a typed
//! request/response pair per call) — the same idiom the teacher applies to
//! every chat-completion-speaking back-end it gateways.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CallParams, ChatResult, Provider};
use crate::errors::{EngineError, Result};
use crate::types::{Message, ProviderCapabilities, UsageStats};

#[derive(Debug)]
pub struct ChatCompletionProvider {
    name: String,
    base_url: String,
    api_key: String,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
}

impl ChatCompletionProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        capabilities: ProviderCapabilities,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            capabilities,
            client,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: WireUsage,
    #[serde(default)]
    #[allow(dead_code)]
    system_fingerprint: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Deserialize, Default)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Deserialize, Default)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

fn role_str(role: crate::types::MessageRole) -> &'static str {
    match role {
        crate::types::MessageRole::System => "system",
        crate::types::MessageRole::User => "user",
        crate::types::MessageRole::Assistant => "assistant",
    }
}

fn map_status(status: reqwest::StatusCode, body: &str) -> EngineError {
    match status.as_u16() {
        401 | 403 => EngineError::Auth(body.to_string()),
        404 => EngineError::NotFound(body.to_string()),
        429 => EngineError::RateLimit(body.to_string()),
        400 | 422 => EngineError::InvalidRequest(body.to_string()),
        s if (500..600).contains(&s) => EngineError::Server(body.to_string()),
        _ => EngineError::Generic(body.to_string()),
    }
}

#[async_trait]
impl Provider for ChatCompletionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        params: &CallParams,
    ) -> Result<ChatResult> {
        let body = ChatRequest {
            model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: role_str(m.role),
                    content: m.as_text(),
                })
                .collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            seed: params.seed,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text));
        }

        let raw: serde_json::Value = response.json().await?;
        let parsed: ChatResponse = serde_json::from_value(raw.clone())?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| EngineError::Server("chat completion returned no choices".into()))?;

        let cached = parsed
            .usage
            .prompt_tokens_details
            .map(|d| d.cached_tokens)
            .unwrap_or(0);
        let reasoning = parsed
            .usage
            .completion_tokens_details
            .map(|d| d.reasoning_tokens)
            .unwrap_or(0);

        Ok(ChatResult {
            text,
            usage: UsageStats::new(
                parsed.usage.prompt_tokens,
                parsed.usage.completion_tokens,
                cached,
                reasoning,
            ),
            raw,
        })
    }
}
