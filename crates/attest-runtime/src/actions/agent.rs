//! External agent invocation.
//!
//! `agent_run` never runs without an explicitly configured [`AgentRuntime`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use attest_core::{ActionError, AgentConfig};

use crate::config::AgentRuntimeConfig;

/// Environment variable carrying the prompt into the agent container.
pub const PROMPT_ENV: &str = "AGENT_PROMPT";

/// What a finished agent produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
}

/// Runs agents to completion. The caller applies the agent timeout.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn run(&self, config: &AgentConfig) -> Result<AgentOutput, ActionError>;
}

/// Runs each agent in a throwaway container (`<program> run --rm`).
pub struct ContainerAgentRuntime {
    program: String,
    api_key: Option<(String, SecretString)>,
}

impl fmt::Debug for ContainerAgentRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerAgentRuntime")
            .field("program", &self.program)
            .field("api_key", &self.api_key.as_ref().map(|(var, _)| var.as_str()))
            .finish()
    }
}

impl ContainerAgentRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            api_key: None,
        }
    }

    /// Pass `key` to the container as environment variable `var`.
    ///
    /// The value is handed to the child's environment, never to its argv.
    pub fn with_api_key(mut self, var: impl Into<String>, key: SecretString) -> Self {
        self.api_key = Some((var.into(), key));
        self
    }

    /// Build from configuration, reading the API key from the environment
    /// when `api_key_env` is set.
    pub fn from_config(config: &AgentRuntimeConfig) -> Self {
        let runtime = Self::new(config.program.clone());
        match &config.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(value) if !value.is_empty() => {
                    debug!(var = %var, "Agent API key loaded from environment");
                    runtime.with_api_key(var.clone(), SecretString::from(value))
                }
                _ => runtime,
            },
            None => runtime,
        }
    }

    fn command(&self, config: &AgentConfig) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("run").arg("--rm");

        cmd.arg("-e").arg(PROMPT_ENV).env(PROMPT_ENV, &config.prompt);
        for (key, value) in &config.env {
            cmd.arg("-e").arg(format!("{}={}", key, value));
        }
        if let Some((var, key)) = &self.api_key {
            // `-e NAME` without a value makes the engine copy it from our env.
            cmd.arg("-e").arg(var).env(var, key.expose_secret());
        }

        cmd.arg(&config.image)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl AgentRuntime for ContainerAgentRuntime {
    async fn run(&self, config: &AgentConfig) -> Result<AgentOutput, ActionError> {
        info!(image = %config.image, "Starting agent container");

        let output = self
            .command(config)
            .output()
            .await
            .map_err(|e| ActionError::Spawn {
                command: self.program.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ActionError::NonZeroExit {
                command: format!("{} run {}", self.program, config.image),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            });
        }

        Ok(AgentOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn agent_config() -> AgentConfig {
        let mut env = BTreeMap::new();
        env.insert("MODE".to_string(), "ci".to_string());
        AgentConfig {
            image: "agent:latest".to_string(),
            prompt: "fix the build".to_string(),
            timeout_ms: None,
            env,
        }
    }

    #[test]
    fn test_command_keeps_key_out_of_argv() {
        let runtime = ContainerAgentRuntime::new("docker")
            .with_api_key("AGENT_API_KEY", SecretString::from("sk-test".to_string()));
        let cmd = runtime.command(&agent_config());
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(&args[..2], &["run", "--rm"]);
        assert!(args.contains(&"MODE=ci".to_string()));
        assert!(args.contains(&"AGENT_API_KEY".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("agent:latest"));
        assert!(!args.iter().any(|a| a.contains("sk-test")));
    }

    #[test]
    fn test_debug_redacts_key() {
        let runtime = ContainerAgentRuntime::new("docker")
            .with_api_key("AGENT_API_KEY", SecretString::from("sk-test".to_string()));
        let debug = format!("{:?}", runtime);
        assert!(debug.contains("AGENT_API_KEY"));
        assert!(!debug.contains("sk-test"));
    }

    #[tokio::test]
    async fn test_engine_failure_is_reported() {
        // `false run --rm ...` exits 1 without output.
        let runtime = ContainerAgentRuntime::new("false");
        let err = runtime.run(&agent_config()).await.unwrap_err();
        assert_eq!(err.tag(), "ActionNonZeroExit");
    }
}
