//! Spec §8 testable properties not already covered by in-module unit tests:
//! fingerprint determinism, the cache round-trip/no-new-calls property, meter
//! additivity, and the `num_agents=1`/`required_verifications > max_iterations`
//! boundary behaviours.

use std::time::Duration;

use thinkcore::cache::{compute_fingerprint, FingerprintInput};
use thinkcore::deepthink::{self, DeepThinkContext, DeepThinkOverrides};
use thinkcore::dispatch::{dispatch, DispatchContext};
use thinkcore::errors::EngineError;
use thinkcore::memory::FoldConfig;
use thinkcore::meter::TokenMeter;
use thinkcore::providers::mock::MockProvider;
use thinkcore::rate_limiter::{AdmissionStrategy, RateLimiter};
use thinkcore::types::{EngineLevel, Message, ModelConfig, Stage, UsageStats};
use thinkcore::ultrathink;
use thinkcore::PrefixCache;

fn model(level: EngineLevel, num_agents: Option<u32>) -> ModelConfig {
    ModelConfig {
        id: "m".into(),
        display_name: "m".into(),
        provider_id: "mock".into(),
        underlying_model: "mock-model".into(),
        level,
        max_iterations: 3,
        required_verifications: 1,
        max_errors: 2,
        num_agents,
        parallel_run_agents: 1,
        stage_models: Default::default(),
        rpm: Some(6000),
    }
}

#[test]
fn fingerprint_is_deterministic_for_identical_inputs() {
    let history = vec![Message::user("2 + 2 = ?")];
    let params = serde_json::json!({"temperature": 0.2});
    let input = FingerprintInput {
        provider: "mock",
        model: "mock-model",
        system: Some("you are a solver"),
        knowledge: None,
        history: &history,
        params: &params,
    };
    assert_eq!(compute_fingerprint(&input), compute_fingerprint(&input));
}

#[tokio::test]
async fn pure_cache_hit_reproduces_the_solution_without_a_new_provider_call() {
    let provider = MockProvider::scripted("mock", vec!["cached text".to_string()]);
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = PrefixCache::new(cache_dir.path());
    let meter = TokenMeter::new();
    let limiter = RateLimiter::new();
    let fold_config = FoldConfig::default();
    let m = model(EngineLevel::DeepThink, None);

    let ctx = DispatchContext {
        provider: &provider,
        provider_name: "mock",
        model: &m,
        cache: &cache,
        meter: &meter,
        rate_limiter: &limiter,
        admission: AdmissionStrategy::Wait,
        deadline: None,
        fold_config: &fold_config,
        content_cache_ttl: Duration::from_secs(60),
        max_retries: 2,
    };

    let history = vec![Message::user("2 + 2 = ?")];
    let first = dispatch(&ctx, Stage::Initial, None, None, &history).await.unwrap();
    assert_eq!(provider.call_count(), 1);

    let second = dispatch(&ctx, Stage::Initial, None, None, &history).await.unwrap();
    assert_eq!(provider.call_count(), 1, "second identical call must hit cache, not the provider");
    assert_eq!(first.text, second.text);
}

#[test]
fn record_a_then_b_matches_record_of_the_sum() {
    let separate = TokenMeter::new();
    separate.record("p", "m", UsageStats::new(10, 1, 0, 0));
    separate.record("p", "m", UsageStats::new(20, 2, 0, 0));

    let combined = TokenMeter::new();
    combined.record("p", "m", UsageStats::new(30, 3, 0, 0));

    assert_eq!(separate.usage_for("p", "m"), combined.usage_for("p", "m"));
}

#[tokio::test]
async fn num_agents_one_reduces_to_plan_wrapped_single_deepthink_plus_synthesis() {
    let provider = MockProvider::scripted(
        "mock",
        vec![
            "plan".to_string(),
            serde_json::json!([{"system_prompt": "solo agent", "temperature": 0.5, "model_override": null, "seed": 0}]).to_string(),
            "4".to_string(),
            r#"{"is_correct": true, "reasoning": "ok", "errors": []}"#.to_string(),
            "summary".to_string(),
        ],
    );
    let m = model(EngineLevel::UltraThink, Some(1));
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = PrefixCache::new(cache_dir.path());
    let meter = TokenMeter::new();
    let limiter = RateLimiter::new();
    let fold_config = FoldConfig::default();

    let ctx = DispatchContext {
        provider: &provider,
        provider_name: "mock",
        model: &m,
        cache: &cache,
        meter: &meter,
        rate_limiter: &limiter,
        admission: AdmissionStrategy::Wait,
        deadline: None,
        fold_config: &fold_config,
        content_cache_ttl: Duration::from_secs(60),
        max_retries: 2,
    };

    let outcome = ultrathink::run("2 + 2 = ?", &ctx, &m).await.unwrap();
    assert_eq!(outcome.agent_results.len(), 1);
    assert!(!outcome.synthesis.is_empty());
}

#[tokio::test]
async fn required_verifications_over_max_iterations_is_rejected_with_invalid_request() {
    let provider = MockProvider::scripted("mock", vec!["x".to_string()]);
    let m = ModelConfig {
        required_verifications: 5,
        max_iterations: 1,
        ..model(EngineLevel::DeepThink, None)
    };
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = PrefixCache::new(cache_dir.path());
    let meter = TokenMeter::new();
    let limiter = RateLimiter::new();
    let fold_config = FoldConfig::default();

    let dispatch_ctx = DispatchContext {
        provider: &provider,
        provider_name: "mock",
        model: &m,
        cache: &cache,
        meter: &meter,
        rate_limiter: &limiter,
        admission: AdmissionStrategy::Wait,
        deadline: None,
        fold_config: &fold_config,
        content_cache_ttl: Duration::from_secs(60),
        max_retries: 2,
    };
    let ctx = DeepThinkContext {
        dispatch: dispatch_ctx,
        model: &m,
    };

    let result = deepthink::run("2 + 2 = ?", &ctx, &DeepThinkOverrides::default()).await;
    assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
}
