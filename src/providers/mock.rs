//! A deterministic in-process provider double used by this crate's own test
//! suite (DeepThink/UltraThink/rate-limiter/cache scenarios, §8). Never
//! compiled into a release build of a dependent crate's production code path —
//! it exists purely so the engine's control flow can be exercised without a
//! network call, the same role `wiremock` plays for the teacher's HTTP-level
//! tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{CallParams, ChatResult, Provider, ResponseResult};
use crate::errors::{EngineError, Result};
use crate::types::{Message, ProviderCapabilities, UsageStats};

/// Replays a fixed script of responses, one per call, repeating the last entry
/// once exhausted. Tracks call count and in-flight concurrency so tests can
/// assert on both sequencing and the `parallel_run_agents` bound (§5).
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    capabilities: ProviderCapabilities,
    script: Mutex<Vec<String>>,
    cursor: AtomicUsize,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_observed_in_flight: AtomicUsize,
    usage_per_call: UsageStats,
    response_ids: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn scripted(name: impl Into<String>, script: Vec<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: ProviderCapabilities::default(),
            script: Mutex::new(script),
            cursor: AtomicUsize::new(0),
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            max_observed_in_flight: AtomicUsize::new(0),
            usage_per_call: UsageStats::new(10, 5, 0, 0),
            response_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_usage_per_call(mut self, usage: UsageStats) -> Self {
        self.usage_per_call = usage;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_observed_in_flight(&self) -> usize {
        self.max_observed_in_flight.load(Ordering::SeqCst)
    }

    fn next_text(&self) -> String {
        let script = self.script.lock();
        if script.is_empty() {
            return String::new();
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst).min(script.len() - 1);
        script[idx].clone()
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_observed_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    async fn chat(
        &self,
        _model: &str,
        _messages: &[Message],
        _params: &CallParams,
    ) -> Result<ChatResult> {
        self.enter();
        // Yield so concurrent callers actually overlap in tests that assert on
        // `max_observed_in_flight`.
        tokio::task::yield_now().await;
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self.next_text();
        self.exit();
        Ok(ChatResult {
            text,
            usage: self.usage_per_call,
            raw: serde_json::json!({}),
        })
    }

    async fn response(
        &self,
        model: &str,
        input: &[Message],
        params: &CallParams,
        _store: bool,
        previous_response_id: Option<&str>,
    ) -> Result<ResponseResult> {
        if !self.capabilities.supports_responses {
            return Err(EngineError::InvalidRequest(format!(
                "provider '{}' does not support the responses API",
                self.name
            )));
        }
        let chat = self.chat(model, input, params).await?;
        let cache_hit = previous_response_id.is_some();
        let usage = if cache_hit {
            UsageStats {
                cached: chat.usage.input,
                ..chat.usage
            }
        } else {
            chat.usage
        };
        let response_id = format!("resp_{}", uuid::Uuid::new_v4());
        self.response_ids.lock().push(response_id.clone());
        Ok(ResponseResult {
            text: chat.text,
            response_id: Some(response_id),
            usage,
            raw: serde_json::json!({}),
        })
    }
}

pub fn shared(provider: MockProvider) -> Arc<dyn Provider> {
    Arc::new(provider)
}
