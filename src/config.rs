//! Model configuration read once at `add_model` time. No hot reload: a
//! changed target means removing and re-adding the model.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Everything needed to construct one model instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConfigTarget {
    /// Provider string a factory must be registered under, e.g. "openai".
    pub provider: String,
    /// Vendor-side model identifier, e.g. "gpt-4o".
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override for the vendor endpoint (proxies, self-hosted gateways).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-request timeout enforced by the HTTP transport.
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Vendor-specific knobs passed through untouched.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ConfigTarget {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            api_key: None,
            base_url: None,
            request_timeout_ms: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// A set of named model targets for bulk registration. BTreeMap so
/// `load_from_config` walks names in a deterministic order.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub models: BTreeMap<String, ConfigTarget>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_optional_fields_absent() {
        let target: ConfigTarget = serde_json::from_value(serde_json::json!({
            "provider": "openai",
            "model": "gpt-4o",
        }))
        .unwrap();
        assert_eq!(target.provider, "openai");
        assert!(target.api_key.is_none());
        assert!(target.request_timeout_ms.is_none());
        assert!(target.extra.is_empty());
    }

    #[test]
    fn registry_config_maps_names_to_targets() {
        let cfg: RegistryConfig = serde_json::from_value(serde_json::json!({
            "models": {
                "default": {"provider": "openai", "model": "gpt-4o", "api_key": "k"},
                "fast": {"provider": "anthropic", "model": "claude-haiku", "api_key": "k2"},
            }
        }))
        .unwrap();
        assert_eq!(cfg.models.len(), 2);
        assert_eq!(cfg.models["fast"].provider, "anthropic");
    }
}
