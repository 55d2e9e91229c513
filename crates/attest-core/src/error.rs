//! Error taxonomy shared by gates, stories and the runner.
//!
//! Every live error exposes a stable `tag()`. Errors never cross the report
//! boundary as live values; they are flattened into [`SerializedError`].

use std::error::Error as StdError;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::ActionKind;
use crate::gate::GateStatus;
use crate::scope::ScopeViolation;

/// Configuration errors. Fatal: detected before anything executes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Story '{story}' depends on unknown story '{dependency}'")]
    UnknownDependency { story: String, dependency: String },

    #[error("Dependency cycle detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Duplicate story id: {0}")]
    DuplicateStoryId(String),

    #[error("Story '{story}' has pattern '{pattern}' in both allowed and forbidden paths")]
    ContradictoryScope { story: String, pattern: String },

    #[error("No gate registered for story '{story}' (gate file: {gate_file})")]
    MissingGate { story: String, gate_file: String },

    #[error("Gate file '{gate_file}' for story '{story}' is invalid: {reason}")]
    InvalidGate {
        story: String,
        gate_file: String,
        reason: String,
    },
}

impl ConfigError {
    /// Stable tag for reporting.
    pub fn tag(&self) -> &'static str {
        match self {
            ConfigError::UnknownDependency { .. } => "UnknownDependency",
            ConfigError::Cycle { .. } => "DependencyCycle",
            ConfigError::DuplicateStoryId(_) => "DuplicateStoryId",
            ConfigError::ContradictoryScope { .. } => "ContradictoryScope",
            ConfigError::MissingGate { .. } => "MissingGate",
            ConfigError::InvalidGate { .. } => "InvalidGate",
        }
    }
}

/// Errors from executing a single action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Invalid {kind} action: {reason}")]
    Validation { kind: ActionKind, reason: String },

    #[error("Failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("{kind} action timed out after {after:?}")]
    Timeout { kind: ActionKind, after: Duration },

    #[error("'{command}' exited with code {code:?}: {stderr}")]
    NonZeroExit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("agent_run requires an agent runtime, but none is configured")]
    AgentRuntimeMissing,

    #[error("{kind} action failed: {message}")]
    Failed { kind: ActionKind, message: String },
}

impl ActionError {
    /// Stable tag for reporting.
    pub fn tag(&self) -> &'static str {
        match self {
            ActionError::Validation { .. } => "ActionValidation",
            ActionError::Spawn { .. } => "ActionSpawn",
            ActionError::Timeout { .. } => "ActionTimeout",
            ActionError::NonZeroExit { .. } => "ActionNonZeroExit",
            ActionError::AgentRuntimeMissing => "AgentRuntimeMissing",
            ActionError::Failed { .. } => "ActionFailed",
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// Validation failures and a missing agent runtime are deterministic.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ActionError::Validation { .. } | ActionError::AgentRuntimeMissing
        )
    }
}

/// Backend start/stop/stream failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Backend '{backend}' failed: {message}")]
pub struct ObservabilityError {
    pub backend: String,
    pub message: String,
}

impl ObservabilityError {
    pub fn new(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

/// Failures reported by the assertion engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssertionFailure {
    #[error("Expected no errors, found {count} (tags: {tags:?})")]
    NoErrors { count: usize, tags: Vec<String> },

    #[error("Expected action '{expected}', saw {seen:?}")]
    MissingAction { expected: String, seen: Vec<String> },

    #[error("Expected stage '{expected}', saw {seen:?}")]
    MissingStage { expected: String, seen: Vec<String> },

    #[error("Assertion '{name}' failed: {message}")]
    Custom { name: String, message: String },

    #[error("{} assertions failed: {}", .0.len(), list_failures(.0))]
    Aggregate(Vec<AssertionFailure>),
}

fn list_failures(failures: &[AssertionFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AssertionFailure {
    pub fn tag(&self) -> &'static str {
        match self {
            AssertionFailure::Aggregate(_) => "AssertionAggregate",
            _ => "AssertionFailed",
        }
    }

    /// The individual failures, flattening an aggregate.
    pub fn failures(&self) -> Vec<&AssertionFailure> {
        match self {
            AssertionFailure::Aggregate(all) => all.iter().collect(),
            single => vec![single],
        }
    }
}

/// Why a gate run did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error(transparent)]
    Observability(#[from] ObservabilityError),

    #[error("Preflight denied execution: {reason}")]
    PreflightDenied { reason: String },

    #[error("Action #{index} failed: {source}")]
    Action {
        index: usize,
        #[source]
        source: ActionError,
    },

    #[error("Evidence collection timed out after {after_ms}ms with {collected} logs")]
    Timeout {
        after_ms: u64,
        collected: usize,
        #[source]
        cause: Option<ObservabilityError>,
    },

    #[error(transparent)]
    Assertion(#[from] AssertionFailure),

    #[error("Gate panicked: {message}")]
    Panicked { message: String },
}

impl GateError {
    pub fn tag(&self) -> &'static str {
        match self {
            GateError::Observability(_) => "ObservabilityError",
            GateError::PreflightDenied { .. } => "PreflightDenied",
            GateError::Action { source, .. } => source.tag(),
            GateError::Timeout { .. } => "EvidenceTimeout",
            GateError::Assertion(failure) => failure.tag(),
            GateError::Panicked { .. } => "GatePanicked",
        }
    }
}

/// Why a story did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoryError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("{} scope violation(s): {}", .0.len(), list_violations(.0))]
    Scope(Vec<ScopeViolation>),

    #[error("Scope check could not read the diff: {0}")]
    DiffUnavailable(String),

    #[error("Gate reported {} without an error", .0.as_str())]
    GateReported(GateStatus),

    #[error("Gate reported success without any action or stage evidence")]
    NoPositiveEvidence,

    #[error("Story exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("Story panicked: {0}")]
    Panicked(String),
}

fn list_violations(violations: &[ScopeViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StoryError {
    pub fn tag(&self) -> &'static str {
        match self {
            StoryError::Gate(e) => e.tag(),
            StoryError::Scope(_) => "ScopeViolation",
            StoryError::DiffUnavailable(_) => "DiffUnavailable",
            StoryError::GateReported(_) => "GateFailed",
            StoryError::NoPositiveEvidence => "NoPositiveEvidence",
            StoryError::Timeout(_) => "StoryTimeout",
            StoryError::Panicked(_) => "GatePanicked",
        }
    }
}

/// Report-safe error representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SerializedError {
    /// Stable tag (e.g., "ActionTimeout")
    pub tag: String,

    /// Error type name
    pub name: String,

    /// Display message
    pub message: String,

    /// Source chain, outermost cause first
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl SerializedError {
    fn build(tag: &str, name: &str, error: &dyn StdError) -> Self {
        let mut chain = Vec::new();
        let mut current = error.source();
        while let Some(cause) = current {
            chain.push(cause.to_string());
            current = cause.source();
        }

        Self {
            tag: tag.to_string(),
            name: name.to_string(),
            message: error.to_string(),
            stack: if chain.is_empty() {
                None
            } else {
                Some(chain.join("\ncaused by: "))
            },
        }
    }
}

impl From<&GateError> for SerializedError {
    fn from(error: &GateError) -> Self {
        Self::build(error.tag(), "GateError", error)
    }
}

impl From<&StoryError> for SerializedError {
    fn from(error: &StoryError) -> Self {
        match error {
            StoryError::Gate(inner) => inner.into(),
            other => Self::build(other.tag(), "StoryError", other),
        }
    }
}

impl From<&ConfigError> for SerializedError {
    fn from(error: &ConfigError) -> Self {
        Self::build(error.tag(), "ConfigError", error)
    }
}
