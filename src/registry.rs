//! Provider/model registry and resolver (C9) — §6
//!
//! Grounded on the teacher's `core/provider_factory.rs` idiom (a small
//! factory that maps a config's declared variant to the concrete adapter
//! type, memoising constructed clients) and Design Notes §9's resolution of
//! the "global singleton" open question: this is an explicit context object,
//! constructed once by the caller and threaded through, not a `lazy_static`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{EngineError, Result};
use crate::providers::{ChatCompletionProvider, MessagesProvider, Provider, ResponsesProvider};
use crate::types::{ModelConfig, ProviderConfig, ProviderVariant};

/// Process-wide provider/model registry. Provider adapters are constructed
/// once per `ProviderConfig` and memoized (§3 Lifecycle: "provider adapter
/// instances are process-wide singletons"); `ModelConfig` entries are cheap
/// data and simply stored by id.
pub struct Registry {
    providers: HashMap<String, Arc<dyn Provider>>,
    models: HashMap<String, ModelConfig>,
}

impl Registry {
    /// Build a registry from the full set of provider and model configs,
    /// constructing one adapter instance per provider up front.
    ///
    /// Every `ModelConfig.provider_id` must resolve against `providers`, and
    /// every config's own `validate()` must report no errors — both are
    /// checked and folded into a single batched `InvalidRequest` (Design
    /// Notes §9: batched validation over fail-fast).
    pub fn build(providers: Vec<ProviderConfig>, models: Vec<ModelConfig>) -> Result<Self> {
        let provider_ids: Vec<&str> = providers.iter().map(|p| p.id.as_str()).collect();

        let mut violations = Vec::new();
        for p in &providers {
            violations.extend(p.validate());
        }
        for m in &models {
            violations.extend(m.validate(&provider_ids));
        }
        if !violations.is_empty() {
            let joined = violations
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EngineError::InvalidRequest(format!(
                "registry configuration invalid: {joined}"
            )));
        }

        let mut provider_map = HashMap::with_capacity(providers.len());
        for config in providers {
            let id = config.id.clone();
            let adapter = build_provider(&config)?;
            provider_map.insert(id, adapter);
        }

        let mut model_map = HashMap::with_capacity(models.len());
        for model in models {
            model_map.insert(model.id.clone(), model);
        }

        Ok(Self {
            providers: provider_map,
            models: model_map,
        })
    }

    /// Resolve a logical model id to its provider adapter and underlying
    /// model name (§6: `resolve(model_id) -> (provider, underlying_model)`).
    pub fn resolve(&self, model_id: &str) -> Result<(Arc<dyn Provider>, &ModelConfig)> {
        let model = self
            .models
            .get(model_id)
            .ok_or_else(|| EngineError::NotFound(format!("unknown model id '{model_id}'")))?;
        let provider = self
            .providers
            .get(&model.provider_id)
            .cloned()
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "model '{model_id}' references unknown provider '{}'",
                    model.provider_id
                ))
            })?;
        Ok((provider, model))
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.get(model_id)
    }

    pub fn provider_config_ids(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }
}

fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let adapter: Arc<dyn Provider> = match config.variant {
        ProviderVariant::ChatCompletion => Arc::new(ChatCompletionProvider::new(
            config.id.as_str(),
            config.base_url.as_str(),
            config.api_key.as_str(),
            timeout,
            config.capabilities,
        )?),
        ProviderVariant::Responses => Arc::new(ResponsesProvider::new(
            config.id.as_str(),
            config.base_url.as_str(),
            config.api_key.as_str(),
            timeout,
            config.capabilities,
        )?),
        ProviderVariant::MessagesWithCacheControl => Arc::new(MessagesProvider::new(
            config.id.as_str(),
            config.base_url.as_str(),
            config.api_key.as_str(),
            timeout,
            config.capabilities,
        )?),
    };
    Ok(adapter)
}
