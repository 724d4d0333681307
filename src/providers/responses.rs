//! Responses-API adapter (§4.1, C1 wire variant 2/3).
//!
//! Grounded on the same adapter idiom as [`super::chat_completion`] but with
//! the extra `previous_response_id`/`store` fields the spec's prefix-chaining
//! flow needs (§4.3): a provider that supports this variant lets the caller
//! skip re-sending history it already holds server-side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CallParams, ChatResult, Provider, ResponseResult};
use crate::errors::{EngineError, Result};
use crate::types::{Message, ProviderCapabilities, UsageStats};

#[derive(Debug)]
pub struct ResponsesProvider {
    name: String,
    base_url: String,
    api_key: String,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
}

impl ResponsesProvider {
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
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<WireInput<'a>>,
    store: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize)]
struct WireInput<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ResponsesBody {
    id: String,
    output_text: String,
    usage: WireUsage,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    input_tokens_details: Option<InputTokensDetails>,
    #[serde(default)]
    output_tokens_details: Option<OutputTokensDetails>,
}

#[derive(Deserialize, Default)]
struct InputTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Deserialize, Default)]
struct OutputTokensDetails {
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
impl Provider for ResponsesProvider {
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
        let response = self.response(model, messages, params, false, None).await?;
        Ok(ChatResult {
            text: response.text,
            usage: response.usage,
            raw: response.raw,
        })
    }

    async fn response(
        &self,
        model: &str,
        input: &[Message],
        params: &CallParams,
        store: bool,
        previous_response_id: Option<&str>,
    ) -> Result<ResponseResult> {
        let body = ResponsesRequest {
            model,
            input: input
                .iter()
                .map(|m| WireInput {
                    role: role_str(m.role),
                    content: m.as_text(),
                })
                .collect(),
            store,
            previous_response_id,
            temperature: params.temperature,
            max_output_tokens: params.max_tokens,
        };

        let http_response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = http_response.status();
        if !status.is_success() {
            let text = http_response.text().await.unwrap_or_default();
            return Err(map_status(status, &text));
        }

        let raw: serde_json::Value = http_response.json().await?;
        let parsed: ResponsesBody = serde_json::from_value(raw.clone())?;

        let cached = parsed
            .usage
            .input_tokens_details
            .map(|d| d.cached_tokens)
            .unwrap_or(0);
        let reasoning = parsed
            .usage
            .output_tokens_details
            .map(|d| d.reasoning_tokens)
            .unwrap_or(0);

        Ok(ResponseResult {
            text: parsed.output_text,
            response_id: Some(parsed.id),
            usage: UsageStats::new(parsed.usage.input_tokens, parsed.usage.output_tokens, cached, reasoning),
            raw,
        })
    }
}
