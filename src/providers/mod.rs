//! Provider adapters (C1) — §4.1
//!
//! Grounded on the teacher's `LLMProvider` trait (`core/traits/provider.rs`):
//! a single associated interface all back-ends implement, capability flags
//! driving dispatch rather than duck typing, and async-first methods. This
//! crate narrows that trait to the three wire variants the spec names and
//! drops the vendor-specific surface (tool calling, embeddings, images,
//! fine-tuning) that the teacher's gateway exposes but this engine never
//! calls.

pub mod chat_completion;
pub mod messages;
pub mod mock;
pub mod responses;
pub mod safe_dump;

pub use chat_completion::ChatCompletionProvider;
pub use messages::MessagesProvider;
pub use responses::ResponsesProvider;

use async_trait::async_trait;
use std::fmt::Debug;

use crate::errors::{EngineError, Result};
use crate::types::{Message, ProviderCapabilities};

/// Per-call parameters, provider-agnostic.
#[derive(Debug, Clone, Default)]
pub struct CallParams {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub seed: Option<u64>,
    /// Index (into the non-system `messages` slice) of the last message of the
    /// memory-folding warm layer (§4.4). Meaningful only to the
    /// messages-with-cache-control variant, which plants its `cache_control`
    /// breakpoint there rather than on the very last message.
    pub cache_boundary_index: Option<usize>,
}

/// Result of a chat-completion or responses call (§4.1).
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub text: String,
    pub usage: crate::types::UsageStats,
    pub raw: serde_json::Value,
}

/// Result of a `response()` call — carries the provider-assigned response id
/// used for server-side prefix-cache chaining (§4.3).
#[derive(Debug, Clone)]
pub struct ResponseResult {
    pub text: String,
    pub response_id: Option<String>,
    pub usage: crate::types::UsageStats,
    pub raw: serde_json::Value,
}

/// Unified provider interface (§4.1). All three wire variants — chat-completion,
/// responses, messages-with-cache-control — implement this one trait; the
/// `capabilities()` flags tell callers which optional methods are meaningful.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
    /// Stable identifier used for routing, logging, and rate-limiter bucket
    /// keys. Must be unique across the whole registry.
    fn name(&self) -> &str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Single-turn call. Every variant supports this; the responses and
    /// messages-with-cache-control back-ends still expose a chat-shaped call
    /// for stages that don't need prefix chaining.
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        params: &CallParams,
    ) -> Result<ChatResult>;

    /// Responses-style call with optional server-side prefix-cache chaining.
    /// Only meaningful when `capabilities().supports_responses`; the default
    /// implementation rejects the call so adapters that don't support it don't
    /// need to override anything.
    async fn response(
        &self,
        _model: &str,
        _input: &[Message],
        _params: &CallParams,
        _store: bool,
        _previous_response_id: Option<&str>,
    ) -> Result<ResponseResult> {
        Err(EngineError::InvalidRequest(format!(
            "provider '{}' does not support the responses API",
            self.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockProvider;
    use super::*;
    use crate::types::Message;

    #[tokio::test]
    async fn chat_returns_configured_response() {
        let provider = MockProvider::scripted("p1", vec!["4".to_string()]);
        let result = provider
            .chat("m1", &[Message::user("2 + 2 = ?")], &CallParams::default())
            .await
            .unwrap();
        assert_eq!(result.text, "4");
    }

    #[tokio::test]
    async fn response_rejected_when_capability_absent() {
        let provider = MockProvider::scripted("p1", vec!["x".to_string()]);
        let result = provider
            .response("m1", &[], &CallParams::default(), false, None)
            .await;
        assert!(result.is_err());
    }
}
