//! Runtime configuration
//!
//! All tunable limits in one place. Defaults apply to any field left out of
//! a JSON document, and environment variables override individual fields.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const ENV_MAX_RESOLUTION_STEPS: &str = "REAGRAPH_MAX_RESOLUTION_STEPS";
pub const ENV_MAX_NOTIFY_ROUNDS: &str = "REAGRAPH_MAX_NOTIFY_ROUNDS";
pub const ENV_CACHE: &str = "REAGRAPH_CACHE";
pub const ENV_MAX_CACHE_ENTRIES: &str = "REAGRAPH_MAX_CACHE_ENTRIES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound on evaluation steps while following one chain of results.
    pub max_resolution_steps: usize,
    /// Upper bound on notification rounds per committed transaction. Writes
    /// made by listeners or hooks start another round.
    pub max_notify_rounds: usize,
    /// Memoise cacheable operation results.
    pub cache_enabled: bool,
    /// Memoised results kept before dead entries are pruned. If every entry
    /// is still live the cache is cleared.
    pub max_cache_entries: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_resolution_steps: 10_000,
            max_notify_rounds: 64,
            cache_enabled: true,
            max_cache_entries: 100_000,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Defaults overridden by `REAGRAPH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup(ENV_MAX_RESOLUTION_STEPS) {
            self.max_resolution_steps = parse_count(ENV_MAX_RESOLUTION_STEPS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_NOTIFY_ROUNDS) {
            self.max_notify_rounds = parse_count(ENV_MAX_NOTIFY_ROUNDS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_MAX_CACHE_ENTRIES) {
            self.max_cache_entries = parse_count(ENV_MAX_CACHE_ENTRIES, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CACHE) {
            self.cache_enabled = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" => false,
                other => {
                    return Err(EngineError::Config(format!(
                        "{ENV_CACHE}: expected a boolean, received \"{other}\""
                    )))
                }
            };
        }
        Ok(self)
    }
}

fn parse_count(name: &str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err(EngineError::Config(format!("{name}: must be at least 1"))),
        Ok(n) => Ok(n),
        Err(e) => Err(EngineError::Config(format!("{name}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> Result<RuntimeConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeConfig::default().with_overrides(|name| vars.get(name).cloned())
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json_str(r#"{ "max_notify_rounds": 8 }"#).unwrap();
        assert_eq!(config.max_notify_rounds, 8);
        assert_eq!(config.max_resolution_steps, 10_000);
        assert!(config.cache_enabled);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = RuntimeConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn environment_overrides_fields() {
        let config = overrides(&[
            (ENV_MAX_RESOLUTION_STEPS, "50"),
            (ENV_CACHE, "off"),
            (ENV_MAX_CACHE_ENTRIES, "512"),
        ])
        .unwrap();
        assert_eq!(config.max_resolution_steps, 50);
        assert_eq!(config.max_cache_entries, 512);
        assert!(!config.cache_enabled);
        assert_eq!(config.max_notify_rounds, 64);
    }

    #[test]
    fn invalid_environment_values_are_rejected() {
        assert!(overrides(&[(ENV_MAX_NOTIFY_ROUNDS, "0")]).is_err());
        assert!(overrides(&[(ENV_MAX_NOTIFY_ROUNDS, "many")]).is_err());
        assert!(overrides(&[(ENV_CACHE, "maybe")]).is_err());
    }
}
