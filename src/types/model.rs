//! Logical model configuration (§3 Data Model)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::provider::ConfigError;

/// The level an engine runs at — drives whether `resolve()` yields a DeepThink
/// or UltraThink entry point (C7/C8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineLevel {
    DeepThink,
    UltraThink,
}

/// A named sub-step of an engine that may route to a distinct underlying model
/// (GLOSSARY: Stage).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initial,
    Verification,
    Correction,
    Improvement,
    Summary,
    Planning,
    AgentConfig,
    Synthesis,
}

impl Stage {
    /// Stable string key used in `stage_models` maps (serde-friendly: a plain
    /// `HashMap<String, String>` avoids the enum-as-map-key pitfall with JSON).
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initial => "initial",
            Stage::Verification => "verification",
            Stage::Correction => "correction",
            Stage::Improvement => "improvement",
            Stage::Summary => "summary",
            Stage::Planning => "planning",
            Stage::AgentConfig => "agent_config",
            Stage::Synthesis => "synthesis",
        }
    }
}

/// Logical model configuration (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub display_name: String,
    pub provider_id: String,
    pub underlying_model: String,
    pub level: EngineLevel,
    pub max_iterations: u32,
    pub required_verifications: u32,
    pub max_errors: u32,
    #[serde(default)]
    pub num_agents: Option<u32>,
    pub parallel_run_agents: u32,
    #[serde(default)]
    pub stage_models: HashMap<String, String>,
    #[serde(default)]
    pub rpm: Option<u32>,
}

impl ModelConfig {
    /// Underlying model to use for a given stage, falling back to the model's
    /// primary `underlying_model` when no stage override is configured.
    pub fn model_for_stage(&self, stage: Stage) -> &str {
        self.stage_models
            .get(stage.as_str())
            .map(String::as_str)
            .unwrap_or(&self.underlying_model)
    }

    /// Validate this config's invariants, batching every violation.
    ///
    /// Known provider ids must be supplied by the caller (the registry owns
    /// that knowledge, not this standalone struct) — `known_provider_ids` lets
    /// this method enforce "`provider_id` resolves to an existing
    /// `ProviderConfig`" without a circular dependency on the registry.
    pub fn validate(&self, known_provider_ids: &[&str]) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if !known_provider_ids.contains(&self.provider_id.as_str()) {
            errors.push(ConfigError::new(
                &self.id,
                format!("provider_id '{}' does not resolve", self.provider_id),
            ));
        }
        for (field, value) in [
            ("max_iterations", self.max_iterations),
            ("required_verifications", self.required_verifications),
            ("parallel_run_agents", self.parallel_run_agents),
        ] {
            if value == 0 {
                errors.push(ConfigError::new(&self.id, format!("{field} must be > 0")));
            }
        }
        if let Some(n) = self.num_agents {
            if n == 0 {
                errors.push(ConfigError::new(&self.id, "num_agents must be > 0"));
            }
        }
        if self.level == EngineLevel::UltraThink && self.num_agents.is_none() {
            errors.push(ConfigError::new(
                &self.id,
                "num_agents is required when level = ultrathink",
            ));
        }
        if self.required_verifications > self.max_iterations {
            errors.push(ConfigError::new(
                &self.id,
                "required_verifications must not exceed max_iterations",
            ));
        }

        errors
    }
}
