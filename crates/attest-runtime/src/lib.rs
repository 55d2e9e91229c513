//! # attest-runtime
//!
//! Async execution for attest on tokio.
//!
//! - [`backend`]: evidence sources ([`ChannelBackend`], [`StaticBackend`])
//! - [`collector`]: idle/absolute dual-clock evidence collection
//! - [`actions`]: wait, exec, browse, deploy and agent actions
//! - [`assertions`]: aggregated assertions over evidence
//! - [`gate`]: the gate state machine and the [`Gate`] trait
//! - [`registry`]: story id to gate resolution
//! - [`vcs`]: git-backed diff statistics for scope checks
//! - [`runner`]: the level-by-level PRD runner
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use attest_runtime::{Assertion, ChannelBackend, GateRunner, GateSpec, RuntimeConfig};
//! use attest_core::Action;
//!
//! let runner = GateRunner::new(Arc::new(RuntimeConfig::default()));
//! let spec = GateSpec::new("server-boots", ChannelBackend::new("local", 1024))
//!     .with_action(Action::exec("./scripts/smoke.sh"))
//!     .with_assertion(Assertion::NoErrors)
//!     .with_assertion(Assertion::has_stage("exec"));
//! let result = runner.run(spec).await;
//! ```

use std::any::Any;
use std::path::PathBuf;
use thiserror::Error;

use attest_core::ConfigError;

pub mod actions;
pub mod assertions;
pub mod backend;
pub mod collector;
pub mod config;
pub mod definition;
pub mod gate;
pub mod preflight;
pub mod registry;
pub mod runner;
pub mod vcs;

pub use actions::{ActionContext, AgentRuntime, BrowserDriver, ContainerAgentRuntime};
pub use assertions::{evaluate_assertions, predicate_fn, Assertion, EvidencePredicate};
pub use backend::{Backend, ChannelBackend, EvidenceSink, EvidenceStream, LogSink, StaticBackend};
pub use collector::{collect_evidence, CollectTimeout};
pub use config::{RetryPolicy, RuntimeConfig};
pub use definition::{FileGateLoader, GateDefinition};
pub use gate::{gate_fn, Gate, GateRunner, GateSpec, SpecGate};
pub use preflight::{AskPolicy, KeywordPreflight, Preflight, PreflightDecision};
pub use registry::{GateLoader, GateRegistry};
pub use runner::{PrdRunner, RunnerConfig};
pub use vcs::{DiffSource, GitDiffSource, VcsError};

/// Errors that stop a PRD run as a whole.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to write report to {}: {reason}", .path.display())]
    ReportWrite { path: PathBuf, reason: String },

    #[error("Scope checking is enabled but no diff source is configured")]
    NoDiffSource,
}

impl RuntimeError {
    pub fn tag(&self) -> &'static str {
        match self {
            RuntimeError::Config(e) => e.tag(),
            RuntimeError::ReportWrite { .. } => "ReportWrite",
            RuntimeError::NoDiffSource => "NoDiffSource",
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "panic with non-string payload");
    }

    #[test]
    fn test_runtime_error_tag_forwards_config() {
        let error = RuntimeError::from(ConfigError::DuplicateStoryId("A".to_string()));
        assert_eq!(error.tag(), "DuplicateStoryId");
    }
}
