//! Memory folding (C5) — §4.4
//!
//! Grounded on the teacher's `core/cache_manager` namespacing idiom (content
//! keyed by a stable hash of its inputs, TTL-bounded) applied to conversation
//! history instead of provider responses; `consolidate` mirrors the teacher's
//! preference for a cheap rule-based pass before reaching for an LLM call.

use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::warn;

use crate::cache::PrefixCache;
use crate::errors::Result;
use crate::meter::TokenMeter;
use crate::providers::{CallParams, Provider};
use crate::types::{Message, MessageContent, MessageRole};

/// Per-layer compression strategy (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Consolidate,
    Distill,
    Summarize,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Consolidate => "consolidate",
            Strategy::Distill => "distill",
            Strategy::Summarize => "summarize",
        }
    }
}

/// Tunables for folding a history (§4.4).
#[derive(Debug, Clone)]
pub struct FoldConfig {
    pub hot_turns: usize,
    pub warm_turns: usize,
    pub warm_strategy: Strategy,
    pub cold_strategy: Strategy,
    pub distill_temperature: f64,
    pub max_distill_retries: u32,
    pub cache_ttl: Duration,
}

impl Default for FoldConfig {
    fn default() -> Self {
        Self {
            hot_turns: 5,
            warm_turns: 10,
            warm_strategy: Strategy::Consolidate,
            cold_strategy: Strategy::Distill,
            distill_temperature: 0.3,
            max_distill_retries: 2,
            cache_ttl: Duration::from_secs(6 * 3600),
        }
    }
}

/// Result of folding a history: a linear `[cold, warm, hot]` prefix plus the
/// index (within that prefix, excluding the leading system message if any)
/// where the messages-with-cache-control variant should plant its marker
/// (the last message of the warm layer, §4.4).
pub struct FoldedHistory {
    pub messages: Vec<Message>,
    pub cache_boundary_index: Option<usize>,
    pub original_tokens: u64,
    pub compressed_tokens: u64,
    pub distillation_tokens: u64,
}

/// Split `history` into hot/warm/cold, compress warm and cold per their
/// configured strategies, and stitch the result back into a single prefix.
///
/// `distill_model` names the underlying model used for `distill`/`summarize`
/// LLM calls; `provider` is the adapter that model is routed through.
pub async fn fold(
    history: &[Message],
    config: &FoldConfig,
    provider: &dyn Provider,
    distill_model: &str,
    cache: &PrefixCache,
    meter: &TokenMeter,
) -> Result<FoldedHistory> {
    let original_tokens = estimate_tokens(history);

    let hot_start = history.len().saturating_sub(config.hot_turns);
    let warm_start = hot_start.saturating_sub(config.warm_turns);

    let cold = &history[..warm_start];
    let warm = &history[warm_start..hot_start];
    let hot = &history[hot_start..];

    let mut distillation_tokens = 0u64;

    let cold_compressed = compress_layer(
        cold,
        config.cold_strategy,
        config,
        provider,
        distill_model,
        cache,
        &mut distillation_tokens,
    )
    .await?;

    let warm_compressed = compress_layer(
        warm,
        config.warm_strategy,
        config,
        provider,
        distill_model,
        cache,
        &mut distillation_tokens,
    )
    .await?;

    let cache_boundary_index = if warm_compressed.is_empty() {
        None
    } else {
        Some(cold_compressed.len() + warm_compressed.len() - 1)
    };

    let mut messages = cold_compressed;
    messages.extend(warm_compressed);
    messages.extend_from_slice(hot);

    let compressed_tokens = estimate_tokens(&messages);
    meter.record_folding(original_tokens, compressed_tokens, distillation_tokens);

    Ok(FoldedHistory {
        messages,
        cache_boundary_index,
        original_tokens,
        compressed_tokens,
        distillation_tokens,
    })
}

async fn compress_layer(
    layer: &[Message],
    strategy: Strategy,
    config: &FoldConfig,
    provider: &dyn Provider,
    distill_model: &str,
    cache: &PrefixCache,
    distillation_tokens: &mut u64,
) -> Result<Vec<Message>> {
    if layer.is_empty() {
        return Ok(Vec::new());
    }

    match strategy {
        Strategy::Consolidate => Ok(consolidate(layer)),
        Strategy::Distill | Strategy::Summarize => {
            let key = layer_key(layer, strategy, distill_model);
            if let Some(cached) = cache.get_fold(&key, strategy.as_str()).await {
                return Ok(vec![Message::assistant(cached)]);
            }

            let text = match strategy {
                Strategy::Distill => {
                    distill_with_retries(layer, config, provider, distill_model, distillation_tokens).await
                }
                Strategy::Summarize => summarize(layer, config, provider, distill_model, distillation_tokens).await,
                Strategy::Consolidate => unreachable!(),
            };

            let text = match text {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "layer compression failed, falling back to consolidate");
                    return Ok(consolidate(layer));
                }
            };

            cache
                .put_fold(&key, strategy.as_str(), text.clone(), config.cache_ttl)
                .await?;
            Ok(vec![Message::assistant(text)])
        }
    }
}

/// Rule-based O(n) merge of consecutive same-role messages (§4.4).
fn consolidate(layer: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::new();
    for msg in layer {
        match out.last_mut() {
            Some(prev) if prev.role == msg.role => {
                let merged = format!("{}\n{}", prev.as_text(), msg.as_text());
                prev.content = MessageContent::Text(merged);
            }
            _ => out.push(msg.clone()),
        }
    }
    out
}

async fn distill_with_retries(
    layer: &[Message],
    config: &FoldConfig,
    provider: &dyn Provider,
    distill_model: &str,
    distillation_tokens: &mut u64,
) -> Result<String> {
    let prompt = format!(
        "Distill the following conversation excerpt into its key concepts, decisions, and \
         reasoning steps, as a compact bullet list:\n\n{}",
        render_layer(layer)
    );
    let params = CallParams {
        temperature: Some(config.distill_temperature),
        ..Default::default()
    };

    let message = Message::user(prompt);
    let mut last_err = None;
    for _ in 0..=config.max_distill_retries {
        match provider.chat(distill_model, std::slice::from_ref(&message), &params).await {
            Ok(result) => {
                *distillation_tokens += result.usage.output;
                return Ok(result.text);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

async fn summarize(
    layer: &[Message],
    config: &FoldConfig,
    provider: &dyn Provider,
    distill_model: &str,
    distillation_tokens: &mut u64,
) -> Result<String> {
    let prompt = format!(
        "Write a short narrative summary of the following conversation excerpt:\n\n{}",
        render_layer(layer)
    );
    let params = CallParams {
        temperature: Some(config.distill_temperature),
        ..Default::default()
    };
    let result = provider.chat(distill_model, &[Message::user(prompt)], &params).await?;
    *distillation_tokens += result.usage.output;
    Ok(result.text)
}

fn render_layer(layer: &[Message]) -> String {
    layer
        .iter()
        .map(|m| format!("{:?}: {}", m.role, m.as_text()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Cache key for a compressed layer: SHA-256 of its rendered input plus the
/// strategy and distill model (§4.4).
fn layer_key(layer: &[Message], strategy: Strategy, distill_model: &str) -> crate::types::Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(render_layer(layer).as_bytes());
    hasher.update(strategy.as_str().as_bytes());
    hasher.update(distill_model.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    crate::types::Fingerprint(out)
}

/// Crude token estimate (chars / 4) used only for folding stats, not billing
/// (billing uses the provider-reported `UsageStats`).
fn estimate_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(|m| (m.as_text().len() as u64) / 4).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;

    fn history_of(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("turn {i}"))
                } else {
                    Message::assistant(format!("turn {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn consolidate_merges_consecutive_same_role_messages() {
        let layer = vec![
            Message::user("a"),
            Message::user("b"),
            Message::assistant("c"),
        ];
        let out = consolidate(&layer);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_text(), "a\nb");
        assert_eq!(out[1].as_text(), "c");
    }

    #[tokio::test]
    async fn short_history_keeps_everything_in_hot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrefixCache::new(dir.path());
        let meter = TokenMeter::new();
        let provider = MockProvider::scripted("p", vec!["distilled".into()]);
        let history = history_of(3);
        let config = FoldConfig::default();

        let folded = fold(&history, &config, &provider, "distill-model", &cache, &meter)
            .await
            .unwrap();
        assert_eq!(folded.messages.len(), 3);
        assert!(folded.cache_boundary_index.is_none());
    }

    #[tokio::test]
    async fn long_history_compresses_cold_and_warm_layers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrefixCache::new(dir.path());
        let meter = TokenMeter::new();
        let provider = MockProvider::scripted("p", vec!["distilled summary".into()]);
        let history = history_of(30);
        let config = FoldConfig::default();

        let folded = fold(&history, &config, &provider, "distill-model", &cache, &meter)
            .await
            .unwrap();

        // cold (distilled, 1 message) + warm (consolidated) + hot (verbatim, 5)
        assert!(folded.messages.len() < history.len());
        assert_eq!(
            folded.messages[folded.messages.len() - config.hot_turns..],
            history[history.len() - config.hot_turns..]
        );
    }

    #[tokio::test]
    async fn distillation_is_cached_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrefixCache::new(dir.path());
        let meter = TokenMeter::new();
        let provider = MockProvider::scripted("p", vec!["distilled".into()]);
        let config = FoldConfig {
            cold_strategy: Strategy::Distill,
            ..FoldConfig::default()
        };
        let history = history_of(30);

        fold(&history, &config, &provider, "distill-model", &cache, &meter)
            .await
            .unwrap();
        let calls_after_first = provider.call_count();
        fold(&history, &config, &provider, "distill-model", &cache, &meter)
            .await
            .unwrap();
        assert_eq!(provider.call_count(), calls_after_first);
    }

    #[tokio::test]
    async fn net_saved_accounts_for_distillation_cost() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PrefixCache::new(dir.path());
        let meter = TokenMeter::new();
        let provider = MockProvider::scripted("p", vec!["distilled".into()])
            .with_usage_per_call(crate::types::UsageStats::new(5, 20, 0, 0));
        let config = FoldConfig {
            cold_strategy: Strategy::Distill,
            ..FoldConfig::default()
        };
        let history = history_of(30);

        fold(&history, &config, &provider, "distill-model", &cache, &meter)
            .await
            .unwrap();
        let stats = meter.folding_stats();
        assert_eq!(stats.net_saved(), stats.saved() as i64 - stats.distillation_tokens as i64);
    }
}
