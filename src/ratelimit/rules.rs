//! Rate limit definitions and the rules file.
//!
//! A [`Rates`] value is the limit definition attached to one tree node. The
//! rules file supplies name-keyed Rates (the property source) and, for the
//! binary, a list of declared code elements standing in for element discovery.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::element::Element;
use crate::error::{RateGateError, Result};

/// How multiple limits of one [`Rates`] combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Every attempted limit must admit.
    #[default]
    And,
    /// Any attempted limit admitting is enough.
    Or,
}

/// A single limit: `permits` per `duration`, optionally conditional.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rate {
    /// Number of permits per window
    pub permits: u64,
    /// Window length, written as `1s`, `5m`, `1h` in YAML
    #[serde(with = "duration_format")]
    pub duration: Duration,
    /// Optional condition restricting when this limit applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl Rate {
    /// Create a new limit.
    ///
    /// # Panics
    ///
    /// Panics if `duration` is zero.
    pub fn new(permits: u64, duration: Duration) -> Self {
        assert!(!duration.is_zero(), "duration must be greater than 0");
        Self {
            permits,
            duration,
            condition: None,
        }
    }

    pub fn per_second(permits: u64) -> Self {
        Self::new(permits, Duration::from_secs(1))
    }

    pub fn per_minute(permits: u64) -> Self {
        Self::new(permits, Duration::from_secs(60))
    }

    /// Attach a condition expression to this limit.
    #[must_use]
    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// The limit definition carried by a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rates {
    /// How the limits combine
    #[serde(default)]
    pub operator: Operator,
    /// Optional top-level condition expression
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Ordered limit entries
    #[serde(default)]
    pub limits: Vec<Rate>,
}

impl Rates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rates holding a single limit.
    pub fn of(rate: Rate) -> Self {
        Self::new().limit(rate)
    }

    #[must_use]
    pub fn limit(mut self, rate: Rate) -> Self {
        self.limits.push(rate);
        self
    }

    #[must_use]
    pub fn operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn has_limits(&self) -> bool {
        !self.limits.is_empty()
    }

    /// True if any limit carries its own condition.
    pub fn has_limit_conditions(&self) -> bool {
        self.limits.iter().any(|l| l.condition.is_some())
    }

    /// Check the limits for values no limiter can honour.
    pub fn validate(&self, name: &str) -> Result<()> {
        for limit in &self.limits {
            if limit.duration.is_zero() {
                return Err(RateGateError::Config(format!(
                    "rate limit '{}' has a zero duration",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Contents of a rules file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesFile {
    /// Name-keyed rates (the property source)
    #[serde(default)]
    pub rate_limits: BTreeMap<String, Rates>,
    /// Declared code elements
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl RulesFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load rules from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: RulesFile = serde_yaml::from_str(yaml)?;
        for (name, rates) in &rules.rate_limits {
            rates.validate(name)?;
        }
        Ok(rules)
    }
}

mod duration_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}
