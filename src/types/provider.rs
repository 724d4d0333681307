//! Provider capability and configuration types (§3 Data Model)
//!
//! Grounded on the teacher's `ProviderCapability` slice + `.contains()` dispatch
//! style (`core/traits/provider.rs`): a closed, small capability set is modelled
//! here as named flags rather than a `Vec<enum>`, since the set is fixed by the
//! spec and never grows at runtime.

use serde::{Deserialize, Serialize};

/// Capability flags drive dispatch decisions in DeepThink/UltraThink (C7/C8).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub supports_responses: bool,
    pub supports_streaming: bool,
    pub supports_vision: bool,
    pub supports_thinking: bool,
    pub supports_caching: bool,
}

/// The three wire protocols a provider adapter may speak (§4.1).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderVariant {
    ChatCompletion,
    Responses,
    MessagesWithCacheControl,
}

/// Static, per-provider configuration (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub variant: ProviderVariant,
    pub capabilities: ProviderCapabilities,
}

impl ProviderConfig {
    /// Validate this config's invariants, batching every violation rather than
    /// failing on the first (Design Notes §9: typed structs, batched error set).
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            errors.push(ConfigError::new(
                &self.id,
                "base_url must be a valid http(s) URL",
            ));
        }
        if self.api_key.is_empty() {
            errors.push(ConfigError::new(&self.id, "api_key must not be empty"));
        }
        if contains_unresolved_placeholder(&self.api_key) {
            errors.push(ConfigError::new(
                &self.id,
                "api_key contains an unresolved ${VAR} placeholder",
            ));
        }
        if self.timeout_secs == 0 {
            errors.push(ConfigError::new(&self.id, "timeout must be > 0"));
        }

        errors
    }
}

fn contains_unresolved_placeholder(s: &str) -> bool {
    if let Some(start) = s.find("${") {
        s[start..].contains('}')
    } else {
        false
    }
}

/// A single batched configuration violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub subject: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.subject, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ProviderConfig {
        ProviderConfig {
            id: "openai".into(),
            base_url: "https://api.openai.com".into(),
            api_key: "sk-test".into(),
            timeout_secs: 30,
            max_retries: 3,
            variant: ProviderVariant::ChatCompletion,
            capabilities: ProviderCapabilities::default(),
        }
    }

    #[test]
    fn valid_config_has_no_errors() {
        assert!(base_config().validate().is_empty());
    }

    #[test]
    fn batches_every_violation_not_just_the_first() {
        let cfg = ProviderConfig {
            base_url: "not-a-url".into(),
            api_key: "${MISSING}".into(),
            timeout_secs: 0,
            ..base_config()
        };
        let errors = cfg.validate();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn detects_unresolved_placeholder() {
        let cfg = ProviderConfig {
            api_key: "prefix-${API_KEY}-suffix".into(),
            ..base_config()
        };
        assert_eq!(cfg.validate().len(), 1);
    }
}
