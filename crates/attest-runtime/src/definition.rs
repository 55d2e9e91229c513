//! Declarative gate files.
//!
//! A gate file describes one gate in YAML:
//!
//! ```yaml
//! name: login-emits-session
//! backend: channel
//! actions:
//!   - type: exec
//!     command: ./scripts/login-smoke.sh
//! assertions:
//!   - type: no_errors
//!   - type: has_action
//!     name: session.created
//! stop:
//!   idleMs: 2000
//!   maxMs: 30000
//! preflight:
//!   deny: ["prod"]
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use attest_core::{Action, Authority, ConfigError, GateResult, Log, StopPolicy, Story};

use crate::assertions::Assertion;
use crate::backend::{Backend, ChannelBackend, StaticBackend};
use crate::gate::{Gate, GateRunner, GateSpec};
use crate::preflight::{AskPolicy, KeywordPreflight, Preflight};
use crate::registry::GateLoader;

#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("Failed to read gate file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse gate YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Action #{index} is invalid: {reason}")]
    InvalidAction { index: usize, reason: String },

    #[error("Static backend requires recorded logs")]
    MissingLogs,
}

/// Which backend a gate file observes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process buffer fed by exec output
    #[default]
    Channel,

    /// Replay of the file's `logs`
    Static,
}

/// Serializable subset of [`Assertion`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssertionDef {
    NoErrors,
    HasAction { name: String },
    HasStage { name: String },
}

impl From<&AssertionDef> for Assertion {
    fn from(def: &AssertionDef) -> Self {
        match def {
            AssertionDef::NoErrors => Assertion::NoErrors,
            AssertionDef::HasAction { name } => Assertion::has_action(name.clone()),
            AssertionDef::HasStage { name } => Assertion::has_stage(name.clone()),
        }
    }
}

/// A gate file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GateDefinition {
    pub name: String,

    #[serde(default)]
    pub backend: BackendKind,

    /// Recorded events for the static backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<Log>>,

    #[serde(default)]
    pub actions: Vec<Action>,

    #[serde(default)]
    pub assertions: Vec<AssertionDef>,

    #[serde(default)]
    pub stop: StopPolicy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_logs: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preflight: Option<KeywordPreflight>,
}

impl GateDefinition {
    pub fn from_yaml(yaml: &str) -> Result<Self, DefinitionError> {
        let definition: GateDefinition = serde_yaml::from_str(yaml)?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DefinitionError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Static checks on every declared action.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        for (index, action) in self.actions.iter().enumerate() {
            action.validate().map_err(|e| DefinitionError::InvalidAction {
                index,
                reason: e.to_string(),
            })?;
        }
        if self.backend == BackendKind::Static && self.logs.is_none() {
            return Err(DefinitionError::MissingLogs);
        }
        Ok(())
    }

    /// A fresh spec for one run.
    pub fn to_spec(&self, channel_capacity: usize) -> GateSpec {
        let backend: Box<dyn Backend> = match self.backend {
            BackendKind::Channel => Box::new(ChannelBackend::new(&self.name, channel_capacity)),
            BackendKind::Static => Box::new(StaticBackend::new(
                &self.name,
                self.logs.clone().unwrap_or_default(),
            )),
        };

        GateSpec {
            name: self.name.clone(),
            preflight: self
                .preflight
                .clone()
                .map(|p| Arc::new(p) as Arc<dyn Preflight>),
            backend,
            actions: self.actions.clone(),
            assertions: self.assertions.iter().map(Assertion::from).collect(),
            stop: self.stop,
            max_logs: self.max_logs,
        }
    }
}

/// Gate running a [`GateDefinition`].
pub struct DefinitionGate {
    definition: GateDefinition,
    runner: GateRunner,
}

impl DefinitionGate {
    pub fn new(definition: GateDefinition, runner: GateRunner) -> Self {
        Self { definition, runner }
    }

    pub fn definition(&self) -> &GateDefinition {
        &self.definition
    }
}

#[async_trait]
impl Gate for DefinitionGate {
    async fn run(&self) -> GateResult {
        let spec = self.definition.to_spec(self.runner.config().channel_capacity);
        self.runner.run(spec).await
    }
}

/// Loads gate files relative to a base directory.
pub struct FileGateLoader {
    base_dir: PathBuf,
    runner: GateRunner,
}

impl FileGateLoader {
    pub fn new(base_dir: impl Into<PathBuf>, runner: GateRunner) -> Self {
        Self {
            base_dir: base_dir.into(),
            runner,
        }
    }
}

impl GateLoader for FileGateLoader {
    fn load(
        &self,
        story: &Story,
        authority: Option<Authority>,
    ) -> Result<Arc<dyn Gate>, ConfigError> {
        let path = self.base_dir.join(&story.gate_file);
        if !path.is_file() {
            return Err(ConfigError::MissingGate {
                story: story.id.clone(),
                gate_file: story.gate_file.clone(),
            });
        }

        let definition = GateDefinition::from_file(&path).map_err(|e| ConfigError::InvalidGate {
            story: story.id.clone(),
            gate_file: story.gate_file.clone(),
            reason: e.to_string(),
        })?;
        debug!(
            story = %story.id,
            gate = %definition.name,
            path = %path.display(),
            "Loaded gate file"
        );

        let runner = match authority {
            Some(authority) => self.runner.clone().with_ask_policy(AskPolicy::from(authority)),
            None => self.runner.clone(),
        };
        Ok(Arc::new(DefinitionGate::new(definition, runner)))
    }
}
