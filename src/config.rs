//! Configuration management for Rategate.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{RateGateError, Result};

/// Prefix for environment overrides, e.g. `RATEGATE__RATE_LIMITING__ENABLED`.
pub const ENV_PREFIX: &str = "RATEGATE";

/// Main configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateGateConfig {
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// When false every request is admitted without walking the trees
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Path to the rules file
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Stop the property tree after the first chain that took a permit
    #[serde(default)]
    pub properties_first_match_only: bool,

    /// Stop the element tree after the first chain that took a permit
    #[serde(default)]
    pub elements_first_match_only: bool,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            rules_path: None,
            properties_first_match_only: false,
            elements_first_match_only: false,
        }
    }
}

fn default_enabled() -> bool {
    true
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl RateGateConfig {
    /// Load configuration from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }
        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RateGateError::Config(e.to_string()))
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RateGateConfig::default();
        assert!(config.rate_limiting.enabled);
        assert!(config.rate_limiting.rules_path.is_none());
        assert!(!config.rate_limiting.elements_first_match_only);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
rate_limiting:
  enabled: false
  rules_path: rules.yaml
  elements_first_match_only: true
logging:
  json: true
"#;
        let config = RateGateConfig::from_yaml(yaml).unwrap();
        assert!(!config.rate_limiting.enabled);
        assert_eq!(config.rate_limiting.rules_path.as_deref(), Some("rules.yaml"));
        assert!(config.rate_limiting.elements_first_match_only);
        assert!(!config.rate_limiting.properties_first_match_only);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_file() {
        let path = std::env::temp_dir().join(format!("rategate-config-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "rate_limiting:\n  properties_first_match_only: true\nlogging:\n  level: debug\n",
        )
        .unwrap();

        let config = RateGateConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(config.rate_limiting.properties_first_match_only);
        assert!(config.rate_limiting.enabled);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_without_file() {
        let config = RateGateConfig::load(None).unwrap();
        assert_eq!(config.logging, LoggingConfig::default());
    }
}
