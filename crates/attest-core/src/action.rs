//! Declared actions and their static validation.
//!
//! Actions are immutable once constructed. Validation here is pure; the
//! runtime executes an action only after `Action::validate` accepts it.

use std::collections::BTreeMap;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ActionError;

/// Longest permitted wait: one hour.
pub const MAX_WAIT_MS: u64 = 3_600_000;

lazy_static! {
    /// Shell metacharacters and expansion syntax rejected in exec commands.
    ///
    /// Commands run through `sh -c`, so chaining (`;`, `&`, `|`), redirection
    /// (`<`, `>`), substitution (`` ` ``, `$(`, `${`), escapes and line breaks
    /// are all refused.
    static ref SHELL_METACHARACTERS: Regex = Regex::new(r"[;&|`$<>\\\n\r]").unwrap();

    /// Deploy targets: a conservative identifier.
    static ref DEPLOY_TARGET: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,62}$").unwrap();

    /// Scheme check for browse URLs.
    static ref HTTP_URL: Regex = Regex::new(r"^(?i)https?://[^\s/$.?#][^\s]*$").unwrap();
}

/// Action discriminant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Wait,
    Exec,
    Browse,
    Deploy,
    AgentRun,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Wait => "wait",
            ActionKind::Exec => "exec",
            ActionKind::Browse => "browse",
            ActionKind::Deploy => "deploy",
            ActionKind::AgentRun => "agent_run",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for an agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Container image running the agent
    pub image: String,

    /// Task given to the agent
    pub prompt: String,

    /// Agent-level timeout (defaults to the runtime's agent timeout)
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Extra environment for the agent
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// One declared action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Sleep for a fixed duration
    Wait { ms: u64 },

    /// Run a shell command
    #[serde(rename_all = "camelCase")]
    Exec {
        command: String,
        #[serde(default)]
        cwd: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Drive a browser to a URL
    #[serde(rename_all = "camelCase")]
    Browse {
        url: String,
        #[serde(default)]
        headless: Option<bool>,
        #[serde(default)]
        wait_ms: Option<u64>,
    },

    /// Deploy a named target
    Deploy { target: String },

    /// Run an external agent
    AgentRun { config: AgentConfig },
}

impl Action {
    pub fn wait(ms: u64) -> Self {
        Action::Wait { ms }
    }

    pub fn exec(command: impl Into<String>) -> Self {
        Action::Exec {
            command: command.into(),
            cwd: None,
            timeout_ms: None,
        }
    }

    pub fn browse(url: impl Into<String>) -> Self {
        Action::Browse {
            url: url.into(),
            headless: None,
            wait_ms: None,
        }
    }

    pub fn deploy(target: impl Into<String>) -> Self {
        Action::Deploy {
            target: target.into(),
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Wait { .. } => ActionKind::Wait,
            Action::Exec { .. } => ActionKind::Exec,
            Action::Browse { .. } => ActionKind::Browse,
            Action::Deploy { .. } => ActionKind::Deploy,
            Action::AgentRun { .. } => ActionKind::AgentRun,
        }
    }

    /// Check the action's inputs without performing it.
    pub fn validate(&self) -> Result<(), ActionError> {
        let kind = self.kind();
        let invalid = |reason: String| ActionError::Validation { kind, reason };

        match self {
            Action::Wait { ms } => {
                if *ms > MAX_WAIT_MS {
                    return Err(invalid(format!(
                        "wait of {}ms exceeds maximum of {}ms",
                        ms, MAX_WAIT_MS
                    )));
                }
            }
            Action::Exec { command, .. } => validate_command(command).map_err(invalid)?,
            Action::Browse { url, .. } => {
                if !HTTP_URL.is_match(url) {
                    return Err(invalid(format!("'{}' is not an http(s) URL", url)));
                }
            }
            Action::Deploy { target } => {
                if !DEPLOY_TARGET.is_match(target) {
                    return Err(invalid(format!("'{}' is not a valid deploy target", target)));
                }
            }
            Action::AgentRun { config } => {
                if config.image.trim().is_empty() {
                    return Err(invalid("agent image must not be empty".to_string()));
                }
                if config.prompt.trim().is_empty() {
                    return Err(invalid("agent prompt must not be empty".to_string()));
                }
            }
        }

        Ok(())
    }
}

fn validate_command(command: &str) -> Result<(), String> {
    if command.trim().is_empty() {
        return Err("command must not be empty".to_string());
    }
    if let Some(found) = SHELL_METACHARACTERS.find(command) {
        return Err(format!(
            "command contains forbidden shell syntax {:?} at byte {}",
            found.as_str(),
            found.start()
        ));
    }
    Ok(())
}
