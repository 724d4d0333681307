//! Concrete scenarios 3 and 6 (§8): UltraThink fan-out concurrency bound, and
//! fail-fast on a malformed AGENT_CONFIG response.

use std::time::Duration;

use thinkcore::dispatch::DispatchContext;
use thinkcore::errors::EngineError;
use thinkcore::memory::FoldConfig;
use thinkcore::providers::mock::MockProvider;
use thinkcore::rate_limiter::{AdmissionStrategy, RateLimiter};
use thinkcore::types::{EngineLevel, ModelConfig};
use thinkcore::ultrathink;
use thinkcore::{PrefixCache, TokenMeter};

fn ultrathink_model(num_agents: u32, parallel: u32) -> ModelConfig {
    ModelConfig {
        id: "m3".into(),
        display_name: "UltraThink Model".into(),
        provider_id: "mock".into(),
        underlying_model: "mock-model".into(),
        level: EngineLevel::UltraThink,
        max_iterations: 2,
        required_verifications: 1,
        max_errors: 2,
        num_agents: Some(num_agents),
        parallel_run_agents: parallel,
        stage_models: Default::default(),
        rpm: Some(6000),
    }
}

fn agent_config_json(n: usize) -> String {
    let configs: Vec<_> = (0..n)
        .map(|i| {
            serde_json::json!({
                "system_prompt": format!("agent {i}"),
                "temperature": 0.5,
                "model_override": null,
                "seed": i
            })
        })
        .collect();
    serde_json::Value::Array(configs).to_string()
}

#[tokio::test]
async fn fan_out_never_exceeds_parallel_run_agents_in_flight() {
    let provider = MockProvider::scripted(
        "mock",
        vec![
            "a high level plan".to_string(),
            agent_config_json(3),
            "4".to_string(),
            r#"{"is_correct": true, "reasoning": "ok", "errors": []}"#.to_string(),
            "summary".to_string(),
        ],
    );
    let model = ultrathink_model(3, 2);
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = PrefixCache::new(cache_dir.path());
    let meter = TokenMeter::new();
    let limiter = RateLimiter::new();
    let fold_config = FoldConfig::default();

    let ctx = DispatchContext {
        provider: &provider,
        provider_name: "mock",
        model: &model,
        cache: &cache,
        meter: &meter,
        rate_limiter: &limiter,
        admission: AdmissionStrategy::Wait,
        deadline: None,
        fold_config: &fold_config,
        content_cache_ttl: Duration::from_secs(60),
        max_retries: 2,
    };

    let outcome = ultrathink::run("2 + 2 = ?", &ctx, &model).await.unwrap();

    assert_eq!(outcome.agent_results.len(), 3);
    assert!(provider.max_observed_in_flight() <= 2);
}

#[tokio::test]
async fn invalid_agent_config_fails_fast_with_no_workers_spawned() {
    let provider = MockProvider::scripted("mock", vec!["a plan".to_string(), "not valid json".to_string()]);
    let model = ultrathink_model(2, 2);
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = PrefixCache::new(cache_dir.path());
    let meter = TokenMeter::new();
    let limiter = RateLimiter::new();
    let fold_config = FoldConfig::default();

    let ctx = DispatchContext {
        provider: &provider,
        provider_name: "mock",
        model: &model,
        cache: &cache,
        meter: &meter,
        rate_limiter: &limiter,
        admission: AdmissionStrategy::Wait,
        deadline: None,
        fold_config: &fold_config,
        content_cache_ttl: Duration::from_secs(60),
        max_retries: 2,
    };

    let result = ultrathink::run("2 + 2 = ?", &ctx, &model).await;

    assert!(matches!(result, Err(EngineError::InvalidRequest(_))));
    // Only the planning and agent_config calls were made; zero workers spawned.
    assert_eq!(provider.call_count(), 2);
}
