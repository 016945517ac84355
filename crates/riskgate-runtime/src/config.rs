//! Runtime configuration.
//!
//! Durations are written in humantime form (`"5s"`, `"1h"`) so a YAML file
//! reads the way an operator would say it.

use riskgate_core::{ConfigError, ShadowAgentType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::providers::CompletionConfig;
use crate::resilience::CircuitBreakerConfig;

/// Serde adapter for `Duration` as a humantime string.
pub(crate) mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// Shadow escalation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// Agents consulted when a request escalates
    pub enabled_agents: Vec<ShadowAgentType>,

    /// Per-agent call timeout
    #[serde(with = "duration_str")]
    pub agent_timeout: Duration,

    /// Upper bound for a whole request, escalation included
    #[serde(with = "duration_str")]
    pub request_deadline: Duration,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            enabled_agents: ShadowAgentType::ALL.to_vec(),
            agent_timeout: Duration::from_secs(5),
            request_deadline: Duration::from_secs(10),
        }
    }
}

/// Shadow result cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_capacity: u64,
    #[serde(with = "duration_str")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Everything the async runtime needs beyond the rule set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub shadow: ShadowConfig,
    pub cache: CacheConfig,
    pub completion: CompletionConfig,
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let breaker = &self.circuit_breaker;
        if breaker.failure_threshold == 0 {
            return Err(invalid("circuit_breaker.failure_threshold", "must be at least 1"));
        }
        if breaker.success_threshold == 0 {
            return Err(invalid("circuit_breaker.success_threshold", "must be at least 1"));
        }
        if breaker.recovery_timeout.is_zero() {
            return Err(invalid("circuit_breaker.recovery_timeout", "must be positive"));
        }
        if self.shadow.agent_timeout.is_zero() {
            return Err(invalid("shadow.agent_timeout", "must be positive"));
        }
        if self.shadow.request_deadline.is_zero() {
            return Err(invalid("shadow.request_deadline", "must be positive"));
        }
        if self.cache.enabled && (self.cache.max_capacity == 0 || self.cache.ttl.is_zero()) {
            return Err(invalid("cache", "an enabled cache needs a capacity and a ttl"));
        }
        if self.completion.model.trim().is_empty() {
            return Err(invalid("completion.model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(invalid("completion.temperature", "must be in [0, 2]"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(60));
        assert_eq!(config.circuit_breaker.success_threshold, 3);
        assert_eq!(config.shadow.agent_timeout, Duration::from_secs(5));
        assert_eq!(config.shadow.request_deadline, Duration::from_secs(10));
        assert_eq!(config.cache.ttl, Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_humantime_yaml() {
        let yaml = r#"
circuit_breaker:
  recovery_timeout: 2m
shadow:
  agent_timeout: 1500ms
  enabled_agents: [input]
cache:
  ttl: 30m
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.circuit_breaker.recovery_timeout, Duration::from_secs(120));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.shadow.agent_timeout, Duration::from_millis(1500));
        assert_eq!(config.shadow.enabled_agents, vec![ShadowAgentType::Input]);
        assert_eq!(config.cache.ttl, Duration::from_secs(1800));
    }

    #[test]
    fn test_serialized_durations_are_readable() {
        let yaml = serde_yaml::to_string(&RuntimeConfig::default()).unwrap();
        assert!(yaml.contains("recovery_timeout: 1m"));
        assert!(yaml.contains("ttl: 1h"));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let yaml = "shadow:\n  agent_timeout: soon\n";
        assert!(matches!(
            RuntimeConfig::from_yaml(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let yaml = "circuit_breaker:\n  failure_threshold: 0\n";
        assert!(matches!(
            RuntimeConfig::from_yaml(yaml),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
