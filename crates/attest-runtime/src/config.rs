//! Runtime configuration.
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration. Durations are written the human way (`"250ms"`, `"5m"`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::preflight::AskPolicy;

/// Errors loading a configuration file.
#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Retry policy for a retryable action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: usize,

    /// First backoff delay; doubles on every retry
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: usize, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecConfig {
    /// Per-command timeout when the action does not set one
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    pub retry: RetryPolicy,

    /// Shell used to run commands (`<shell> -c <command>`)
    pub shell: String,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            shell: "sh".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployConfig {
    /// Deploy program; the target is appended as the last argument
    pub program: String,

    pub args: Vec<String>,

    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    pub retry: RetryPolicy,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            program: "./deploy.sh".to_string(),
            args: Vec::new(),
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::new(2, Duration::from_secs(1)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserConfig {
    /// Browser executable driven by the process driver
    pub program: String,

    /// Hold time after navigation when the action does not set one
    #[serde(with = "humantime_serde")]
    pub default_wait: Duration,

    /// Added to the hold time to bound the whole browse action
    #[serde(with = "humantime_serde")]
    pub slack: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            program: "chromium".to_string(),
            default_wait: Duration::from_secs(1),
            slack: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentRuntimeConfig {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Container engine used by the container runtime
    pub program: String,

    /// Environment variable holding the agent API key, if any
    pub api_key_env: Option<String>,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            program: "docker".to_string(),
            api_key_env: None,
        }
    }
}

/// Configuration shared by every gate run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Pause between the last action and evidence collection
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,

    pub exec: ExecConfig,
    pub deploy: DeployConfig,
    pub browser: BrowserConfig,
    pub agent: AgentRuntimeConfig,

    /// Applied to preflight ASK decisions when no authority is set
    pub ask_policy: AskPolicy,

    /// Capacity of the in-process channel backend buffer
    pub channel_capacity: usize,

    /// Per-story deadline
    #[serde(with = "humantime_serde::option")]
    pub story_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(250),
            exec: ExecConfig::default(),
            deploy: DeployConfig::default(),
            browser: BrowserConfig::default(),
            agent: AgentRuntimeConfig::default(),
            ask_policy: AskPolicy::default(),
            channel_capacity: 1024,
            story_timeout: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}

mod humantime_serde {
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
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let s: Option<String> = Option::deserialize(deserializer)?;
            s.map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.settle_delay, Duration::from_millis(250));
        assert_eq!(config.exec.timeout, Duration::from_secs(30));
        assert_eq!(config.exec.retry.max_retries, 3);
        assert_eq!(config.deploy.timeout, Duration::from_secs(300));
        assert_eq!(config.deploy.retry.max_retries, 2);
        assert_eq!(config.agent.timeout, Duration::from_secs(300));
        assert_eq!(config.ask_policy, AskPolicy::Proceed);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = RuntimeConfig::from_yaml("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_humantime_durations() {
        let yaml = r#"
settleDelay: 1s
storyTimeout: 2m
askPolicy: deny
exec:
  timeout: 500ms
  retry:
    maxRetries: 1
    baseDelay: 10ms
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.settle_delay, Duration::from_secs(1));
        assert_eq!(config.story_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.ask_policy, AskPolicy::Deny);
        assert_eq!(config.exec.timeout, Duration::from_millis(500));
        assert_eq!(config.exec.retry, RetryPolicy::new(1, Duration::from_millis(10)));
        assert_eq!(config.exec.shell, "sh");
    }

    #[test]
    fn test_invalid_duration_rejected() {
        assert!(RuntimeConfig::from_yaml("settleDelay: soon").is_err());
    }
}
