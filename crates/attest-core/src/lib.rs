//! # attest-core
//!
//! Deterministic model for evidence-based verification.
//!
//! A **gate** proves a running system produced observable evidence of a
//! claimed behavior: it performs real actions, collects the events the
//! system emits, and asserts on them. A **PRD** is a dependency graph of
//! **stories**, each backed by one gate.
//!
//! This crate holds everything that does not need an async runtime:
//!
//! 1. **Evidence**: [`Log`] events and the sorted [`EvidenceSummary`]
//! 2. **Actions**: the closed [`Action`] set and its static validation
//! 3. **Errors**: the typed taxonomy and its report-safe form
//! 4. **PRDs**: parsing, flattening and static validation
//! 5. **Graph**: cycle detection and concurrency levels
//! 6. **Scope**: path and size constraints on a story's diff
//! 7. **Reports**: the versioned JSON shapes
//!
//! Execution lives in `attest-runtime`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use attest_core::Prd;
//!
//! let prd = Prd::from_file("prd.yaml")?;
//! let graph = prd.validate()?;
//! for (i, level) in graph.levels().iter().enumerate() {
//!     println!("level {}: {}", i, level.join(", "));
//! }
//! ```

pub mod action;
pub mod error;
pub mod evidence;
pub mod gate;
pub mod graph;
pub mod prd;
pub mod report;
pub mod scope;

// Re-export main types at crate root
pub use action::{Action, ActionKind, AgentConfig, MAX_WAIT_MS};
pub use error::{
    ActionError, AssertionFailure, ConfigError, GateError, ObservabilityError, SerializedError,
    StoryError,
};
pub use evidence::{EvidenceSummary, Log, LogError, LogStatus};
pub use gate::{duration_ms, GateReport, GateResult, GateStatus, StopPolicy, REPORT_VERSION};
pub use graph::DependencyGraph;
pub use prd::{Authority, Prd, PrdError, Story};
pub use report::{
    render_gate_result, render_prd_report, PrdReport, ReportFormat, StoryResult, StoryStatus,
};
pub use scope::{
    matches_pattern, DiffStats, FileChange, Scope, ScopeViolation, DEFAULT_FORBIDDEN_PATHS,
};
