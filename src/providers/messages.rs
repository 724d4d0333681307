//! Messages-with-cache-control adapter (§4.1, C1 wire variant 3/3).
//!
//! Grounded on the same client-construction idiom as the other two adapters,
//! with the Anthropic-style system-as-top-level-field shape and an explicit
//! `cache_control` breakpoint marker instead of a server-assigned response id
//! — memory folding (§4.4) places this marker on the warm layer's last message
//! rather than relying on prefix-cache chaining.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CallParams, ChatResult, Provider};
use crate::errors::{EngineError, Result};
use crate::types::{Message, MessageRole, ProviderCapabilities, UsageStats};

#[derive(Debug)]
pub struct MessagesProvider {
    name: String,
    base_url: String,
    api_key: String,
    capabilities: ProviderCapabilities,
    client: reqwest::Client,
}

impl MessagesProvider {
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
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: Vec<WireBlock<'a>>,
}

#[derive(Serialize)]
struct WireBlock<'a> {
    #[serde(rename = "type")]
    block_type: &'a str,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Serialize, Deserialize, Clone, Copy)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: CacheControlKind,
}

#[derive(Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum CacheControlKind {
    Ephemeral,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    usage: WireUsage,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "user",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
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
impl Provider for MessagesProvider {
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
        let system = messages
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.as_text());

        let boundary = params
            .cache_boundary_index
            .unwrap_or(
                messages
                    .iter()
                    .filter(|m| m.role != MessageRole::System)
                    .count()
                    .saturating_sub(1),
            );

        let wire_messages: Vec<WireMessage> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .enumerate()
            .map(|(i, m)| WireMessage {
                role: role_str(m.role),
                content: vec![WireBlock {
                    block_type: "text",
                    text: m.as_text(),
                    cache_control: if i == boundary {
                        Some(CacheControl {
                            kind: CacheControlKind::Ephemeral,
                        })
                    } else {
                        None
                    },
                }],
            })
            .collect();

        let body = MessagesRequest {
            model,
            system: system.as_deref(),
            messages: wire_messages,
            max_tokens: params.max_tokens.unwrap_or(4096),
            temperature: params.temperature,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(status, &text));
        }

        let raw: serde_json::Value = response.json().await?;
        let parsed: MessagesResponse = serde_json::from_value(raw.clone())?;
        let text = parsed
            .content
            .into_iter()
            .map(|b| b.text)
            .collect::<Vec<_>>()
            .join("");

        Ok(ChatResult {
            text,
            usage: UsageStats::new(
                parsed.usage.input_tokens,
                parsed.usage.output_tokens,
                parsed.usage.cache_read_input_tokens,
                0,
            ),
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn cache_control_lands_on_the_folding_boundary_not_the_last_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(body_partial_json(serde_json::json!({
                "messages": [
                    {"role": "user", "content": [{"type": "text", "text": "warm", "cache_control": {"type": "ephemeral"}}]},
                    {"role": "user", "content": [{"type": "text", "text": "hot"}]}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "ok"}],
                "usage": {"input_tokens": 1, "output_tokens": 1, "cache_read_input_tokens": 0}
            })))
            .mount(&server)
            .await;

        let provider = MessagesProvider::new(
            "anthropic",
            server.uri(),
            "sk-test",
            Duration::from_secs(5),
            ProviderCapabilities::default(),
        )
        .unwrap();

        let params = CallParams {
            cache_boundary_index: Some(0),
            ..Default::default()
        };
        let result = provider
            .chat(
                "claude-test",
                &[Message::user("warm"), Message::user("hot")],
                &params,
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn chat_joins_content_blocks_and_reports_cached_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "hel"}, {"type": "text", "text": "lo"}],
                "usage": {"input_tokens": 12, "output_tokens": 4, "cache_read_input_tokens": 8}
            })))
            .mount(&server)
            .await;

        let provider = MessagesProvider::new(
            "anthropic",
            server.uri(),
            "sk-test",
            Duration::from_secs(5),
            ProviderCapabilities::default(),
        )
        .unwrap();

        let result = provider
            .chat(
                "claude-test",
                &[Message::system("be brief"), Message::user("hi")],
                &CallParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.text, "hello");
        assert_eq!(result.usage, UsageStats::new(12, 4, 8, 0));
    }
}
