//! Reasoning-orchestration core: DeepThink/UltraThink engines over a
//! provider-neutral adapter layer, with a shared prefix cache, rate limiter,
//! memory folder, and token meter (§1, §2).
//!
//! Grounded on the teacher's top-level `lib.rs` shape: `pub mod` declarations
//! for each subsystem plus a handful of free functions at the crate root that
//! wire the subsystems together for a caller, rather than one big "god
//! struct". `Engine` plays the role the teacher's `Gateway` context object
//! plays — an explicitly constructed, explicitly threaded singleton (Design
//! Notes §9), not a `lazy_static`/`OnceCell` global.

pub mod cache;
pub mod deepthink;
pub mod dispatch;
pub mod errors;
pub mod memory;
pub mod meter;
pub mod providers;
pub mod rate_limiter;
pub mod registry;
pub mod types;
pub mod ultrathink;

use std::path::Path;
use std::time::Duration;

use errors::{EngineError, Result};
use memory::FoldConfig;
use rate_limiter::{AdmissionStrategy, RateLimiter};
use types::{Message, ModelConfig, ProviderConfig, UsageStats};

pub use cache::PrefixCache;
pub use deepthink::{DeepThinkOutcome, DeepThinkOverrides};
pub use meter::TokenMeter;
pub use registry::Registry;
pub use ultrathink::UltraThinkOutcome;

/// Top-level handle bundling the registry and the process-wide singletons
/// every call needs (§3 Lifecycle, §5): constructed once by the caller (e.g.
/// in `main`) and passed by reference into every request.
pub struct Engine {
    registry: Registry,
    cache: PrefixCache,
    meter: TokenMeter,
    rate_limiter: RateLimiter,
    fold_config: FoldConfig,
    admission: AdmissionStrategy,
    deadline: Option<Duration>,
    content_cache_ttl: Duration,
}

/// Knobs that rarely vary per deployment but aren't part of any one model's
/// config (§4.2 admission strategy, §4.3 cache TTL, §4.4 fold defaults).
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub fold_config: FoldConfig,
    pub admission: AdmissionStrategy,
    pub deadline: Option<Duration>,
    pub content_cache_ttl: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            fold_config: FoldConfig::default(),
            admission: AdmissionStrategy::Wait,
            deadline: None,
            content_cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl Engine {
    pub fn new(
        providers: Vec<ProviderConfig>,
        models: Vec<ModelConfig>,
        cache_dir: impl AsRef<Path>,
        options: EngineOptions,
    ) -> Result<Self> {
        let registry = Registry::build(providers, models)?;
        Ok(Self {
            registry,
            cache: PrefixCache::new(cache_dir.as_ref()),
            meter: TokenMeter::new(),
            rate_limiter: RateLimiter::new(),
            fold_config: options.fold_config,
            admission: options.admission,
            deadline: options.deadline,
            content_cache_ttl: options.content_cache_ttl,
        })
    }

    pub fn meter(&self) -> &TokenMeter {
        &self.meter
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// §6: `resolve(model_id) -> (provider_instance, underlying_model)`.
    pub fn resolve(&self, model_id: &str) -> Result<(std::sync::Arc<dyn providers::Provider>, String)> {
        let (provider, model) = self.registry.resolve(model_id)?;
        Ok((provider, model.underlying_model.clone()))
    }

    /// §6: thin pass-through chat-completion call, still routed through the
    /// rate limiter and token meter like every other call a stage makes.
    pub async fn chat_completion(
        &self,
        model_id: &str,
        messages: &[Message],
        params: &providers::CallParams,
    ) -> Result<providers::ChatResult> {
        let (provider, model) = self.registry.resolve(model_id)?;
        let underlying = model.underlying_model.as_str();
        let bucket_key = rate_limiter::bucket_key(provider.name(), underlying);
        let spec = rate_limiter::BucketSpec::from_rpm(model.rpm.unwrap_or(600));
        self.rate_limiter
            .acquire(&bucket_key, &spec, self.admission, self.deadline)
            .await?;
        let result = provider.chat(underlying, messages, params).await?;
        self.meter.record(provider.name(), underlying, result.usage);
        Ok(result)
    }

    /// §6: responses-style call with prefix chaining, emulated through
    /// `chat_completion` (no id returned) when the provider lacks the
    /// capability.
    pub async fn responses_call(
        &self,
        model_id: &str,
        input: &[Message],
        params: &providers::CallParams,
        store: bool,
        previous_response_id: Option<&str>,
    ) -> Result<providers::ResponseResult> {
        let (provider, model) = self.registry.resolve(model_id)?;
        let underlying = model.underlying_model.as_str();
        let bucket_key = rate_limiter::bucket_key(provider.name(), underlying);
        let spec = rate_limiter::BucketSpec::from_rpm(model.rpm.unwrap_or(600));
        self.rate_limiter
            .acquire(&bucket_key, &spec, self.admission, self.deadline)
            .await?;

        if provider.capabilities().supports_responses {
            let result = provider
                .response(underlying, input, params, store, previous_response_id)
                .await?;
            self.meter.record(provider.name(), underlying, result.usage);
            Ok(result)
        } else {
            let result = provider.chat(underlying, input, params).await?;
            self.meter.record(provider.name(), underlying, result.usage);
            Ok(providers::ResponseResult {
                text: result.text,
                response_id: None,
                usage: result.usage,
                raw: result.raw,
            })
        }
    }

    fn dispatch_context<'a>(&'a self, model: &'a ModelConfig, provider: &'a dyn providers::Provider) -> dispatch::DispatchContext<'a> {
        dispatch::DispatchContext {
            provider,
            provider_name: provider.name(),
            model,
            cache: &self.cache,
            meter: &self.meter,
            rate_limiter: &self.rate_limiter,
            admission: self.admission,
            deadline: self.deadline,
            fold_config: &self.fold_config,
            content_cache_ttl: self.content_cache_ttl,
            max_retries: 2,
        }
    }

    /// §6: `run_deepthink(model_id, problem, overrides) -> DeepThinkOutcome`.
    pub async fn run_deepthink(
        &self,
        model_id: &str,
        problem: &str,
        overrides: DeepThinkOverrides,
    ) -> Result<DeepThinkOutcome> {
        let (provider, model) = self.registry.resolve(model_id)?;
        if model.level != types::EngineLevel::DeepThink {
            return Err(EngineError::InvalidRequest(format!(
                "model '{model_id}' is not a deepthink model"
            )));
        }
        let dispatch_ctx = self.dispatch_context(model, provider.as_ref());
        let ctx = deepthink::DeepThinkContext {
            dispatch: dispatch_ctx,
            model,
        };
        deepthink::run(problem, &ctx, &overrides).await
    }

    /// §6: `run_ultrathink(model_id, problem, overrides) -> UltraThinkOutcome`.
    pub async fn run_ultrathink(
        &self,
        model_id: &str,
        problem: &str,
        _overrides: DeepThinkOverrides,
    ) -> Result<UltraThinkOutcome> {
        let (provider, model) = self.registry.resolve(model_id)?;
        if model.level != types::EngineLevel::UltraThink {
            return Err(EngineError::InvalidRequest(format!(
                "model '{model_id}' is not an ultrathink model"
            )));
        }
        let dispatch_ctx = self.dispatch_context(model, provider.as_ref());
        ultrathink::run(problem, &dispatch_ctx, model).await
    }

    /// Estimated cost across every (provider, model) call recorded so far
    /// (§4.8, §6 `estimated_cost`).
    pub fn estimated_cost(&self, pricing: &types::PricingTable) -> f64 {
        self.meter.estimate_cost(pricing)
    }

    pub fn total_usage(&self) -> UsageStats {
        self.meter.total()
    }
}
