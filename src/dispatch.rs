//! Shared stage-call dispatch, used by both DeepThink (C7) and UltraThink
//! (C8): every LLM call in either engine goes through memory folding, the
//! prefix cache, and the rate limiter uniformly (§4.1, §4.2, §4.3, §4.4).
//!
//! Grounded on the teacher's single `execute_request` chokepoint
//! (`core/gateway.rs`-equivalent) that every route funnels through before
//! reaching a provider — this crate's engines funnel every stage call through
//! [`dispatch`] the same way.

use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

use crate::cache::{self, CacheHit, FingerprintInput, PrefixCache};
use crate::errors::Result;
use crate::memory::{self, FoldConfig};
use crate::meter::TokenMeter;
use crate::providers::{CallParams, Provider};
use crate::rate_limiter::{self, AdmissionStrategy, BucketSpec, RateLimiter};
use crate::types::{Message, ModelConfig, Stage, UsageStats};

/// Everything a stage call needs that doesn't change within one engine run.
pub struct DispatchContext<'a> {
    pub provider: &'a dyn Provider,
    pub provider_name: &'a str,
    pub model: &'a ModelConfig,
    pub cache: &'a PrefixCache,
    pub meter: &'a TokenMeter,
    pub rate_limiter: &'a RateLimiter,
    pub admission: AdmissionStrategy,
    pub deadline: Option<Duration>,
    pub fold_config: &'a FoldConfig,
    pub content_cache_ttl: Duration,
    /// Bound on retries for `RateLimit`/`Timeout`/`Server` provider errors
    /// (§7: "Bounded by `max_retries`"), sourced from the provider's config.
    pub max_retries: u32,
}

pub struct StageResult {
    pub text: String,
    pub usage: UsageStats,
}

/// Run one stage call: fold `history`, fingerprint the resulting prefix,
/// consult the cache, gate on the rate limiter, dispatch to the provider
/// (responses-style with prefix chaining when supported), and write the
/// cache back.
#[instrument(skip(ctx, history, knowledge), fields(provider = ctx.provider_name))]
pub async fn dispatch(
    ctx: &DispatchContext<'_>,
    stage: Stage,
    system: Option<&str>,
    knowledge: Option<&str>,
    history: &[Message],
) -> Result<StageResult> {
    let underlying = underlying_model(ctx, stage);

    let folded = memory::fold(history, ctx.fold_config, ctx.provider, &underlying, ctx.cache, ctx.meter).await?;

    let params_json = serde_json::json!({});
    let fp = cache::compute_fingerprint(&FingerprintInput {
        provider: ctx.provider_name,
        model: &underlying,
        system,
        knowledge,
        history: &folded.messages,
        params: &params_json,
    });

    let mut previous_response_id = None;
    match ctx.cache.resolve(&fp).await {
        Some(CacheHit::Content(text)) => {
            return Ok(StageResult {
                text,
                usage: UsageStats::default(),
            });
        }
        Some(CacheHit::ResponseId(id)) => previous_response_id = Some(id),
        None => {}
    }

    let bucket_key = rate_limiter::bucket_key(ctx.provider_name, &underlying);
    let spec = BucketSpec::from_rpm(ctx.model.rpm.unwrap_or(600));

    let mut messages = Vec::with_capacity(folded.messages.len() + 1);
    if let Some(s) = system {
        messages.push(Message::system(s));
    }
    messages.extend(folded.messages.iter().cloned());

    // `cache_boundary_index` is relative to the non-system slice (§4.4); the
    // messages-with-cache-control adapter re-derives that same slice, so no
    // offset is needed even though `system` was just prepended above.
    let call_params = CallParams {
        cache_boundary_index: folded.cache_boundary_index,
        ..Default::default()
    };

    let mut attempt = 0u32;
    let (text, usage, response_id) = loop {
        ctx.rate_limiter
            .acquire(&bucket_key, &spec, ctx.admission, ctx.deadline)
            .await?;

        let outcome = if ctx.provider.capabilities().supports_responses {
            ctx.provider
                .response(&underlying, &messages, &call_params, true, previous_response_id.as_deref())
                .await
                .map(|r| (r.text, r.usage, r.response_id))
        } else {
            ctx.provider
                .chat(&underlying, &messages, &call_params)
                .await
                .map(|r| (r.text, r.usage, None))
        };

        match outcome {
            Ok(v) => break v,
            Err(e) if e.is_retryable() && attempt < ctx.max_retries => {
                attempt += 1;
                tracing::warn!(attempt, error = %e, "retrying stage call after retryable provider error");
                continue;
            }
            Err(e) => return Err(e),
        }
    };

    ctx.meter.record(ctx.provider_name, &underlying, usage);
    ctx.cache.put_content(&fp, text.clone(), ctx.content_cache_ttl).await?;
    if let Some(id) = response_id {
        ctx.cache.put_response_id(&fp, id, ctx.content_cache_ttl).await?;
    }

    Ok(StageResult { text, usage })
}

fn underlying_model(ctx: &DispatchContext<'_>, stage: Stage) -> String {
    ctx.model.model_for_stage(stage).to_string()
}

pub type SharedProvider = Arc<dyn Provider>;
