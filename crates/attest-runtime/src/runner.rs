//! Level-by-level PRD execution.
//!
//! Everything that can be checked statically is checked before the first
//! story runs: dependency references, cycles, scope contradictions and gate
//! resolution. Stories of one level run concurrently. The run stops after
//! the first level containing a failure, and that level's first failing
//! story in scan order is reported, whatever order the stories finished in.

use futures::future::join_all;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use attest_core::{
    duration_ms, ConfigError, Prd, PrdReport, SerializedError, Story, StoryError, StoryResult,
    StoryStatus,
};

use crate::gate::Gate;
use crate::registry::GateRegistry;
use crate::vcs::DiffSource;
use crate::{panic_message, RuntimeError};

/// Per-run options, usually built from CLI flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Validate each story's diff against its scope before running its gate
    pub check_scope: bool,

    /// Reference the diff is taken against
    pub base_ref: String,

    /// Where to write the JSON report
    pub report_path: Option<PathBuf>,

    /// Deadline for one story, scope check included
    pub story_timeout: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            check_scope: false,
            base_ref: "HEAD".to_string(),
            report_path: None,
            story_timeout: None,
        }
    }
}

pub struct PrdRunner {
    registry: GateRegistry,
    diff_source: Option<Arc<dyn DiffSource>>,
    config: RunnerConfig,
}

impl PrdRunner {
    pub fn new(registry: GateRegistry) -> Self {
        Self {
            registry,
            diff_source: None,
            config: RunnerConfig::default(),
        }
    }

    pub fn with_diff_source(mut self, source: Arc<dyn DiffSource>) -> Self {
        self.diff_source = Some(source);
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn registry(&self) -> &GateRegistry {
        &self.registry
    }

    /// Run every story of `prd` in dependency order.
    ///
    /// Configuration problems are returned as errors and nothing runs.
    /// Story failures never error: they are recorded in the report.
    pub async fn run(&self, prd: &Prd) -> Result<PrdReport, RuntimeError> {
        let started = Instant::now();
        let graph = prd.validate()?;
        let gates = self.registry.resolve(prd)?;
        if self.config.check_scope && self.diff_source.is_none() {
            return Err(RuntimeError::NoDiffSource);
        }

        info!(
            prd = prd.name.as_deref().unwrap_or("unnamed"),
            stories = graph.len(),
            levels = graph.levels().len(),
            "Starting PRD run"
        );

        let mut results: Vec<StoryResult> = Vec::with_capacity(graph.len());
        let mut failed_story = None;

        for (index, level) in graph.levels().iter().enumerate() {
            debug!(level = index, stories = ?level, "Running level");

            let mut runs = Vec::with_capacity(level.len());
            for id in level {
                let Some(story) = prd.story(id) else { continue };
                let gate = gates.get(id).cloned().ok_or_else(|| ConfigError::MissingGate {
                    story: story.id.clone(),
                    gate_file: story.gate_file.clone(),
                })?;
                runs.push(self.run_story(story, gate));
            }

            let batch = join_all(runs).await;
            let first_failure = batch.iter().find(|r| !r.is_success()).map(|r| r.id.clone());
            results.extend(batch);

            if let Some(id) = first_failure {
                warn!(level = index, story = %id, "Level failed, stopping run");
                failed_story = Some(id);
                break;
            }
        }

        let report = PrdReport::new(results, failed_story, duration_ms(started.elapsed()));
        info!(
            success = report.success,
            executed = report.stories.len(),
            duration_ms = report.total_duration_ms,
            "PRD run finished"
        );

        if let Some(path) = &self.config.report_path {
            write_report(path, &report).await?;
        }
        Ok(report)
    }

    async fn run_story(&self, story: &Story, gate: Arc<dyn Gate>) -> StoryResult {
        let started = Instant::now();
        info!(story = %story.id, title = %story.title, "Story started");

        let execution = AssertUnwindSafe(self.execute_story(story, gate)).catch_unwind();
        let outcome = match self.config.story_timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(caught) => caught,
                Err(_) => Ok(Err((StoryStatus::Timeout, StoryError::Timeout(limit)))),
            },
            None => execution.await,
        };

        let (status, error) = match outcome {
            Ok(Ok(())) => (StoryStatus::Success, None),
            Ok(Err((status, error))) => (status, Some(error)),
            Err(payload) => (
                StoryStatus::Failed,
                Some(StoryError::Panicked(panic_message(payload.as_ref()))),
            ),
        };

        let duration = duration_ms(started.elapsed());
        match &error {
            None => info!(story = %story.id, duration_ms = duration, "Story passed"),
            Some(e) => warn!(story = %story.id, tag = e.tag(), error = %e, "Story failed"),
        }

        StoryResult {
            id: story.id.clone(),
            title: story.title.clone(),
            gate_file: story.gate_file.clone(),
            status,
            duration_ms: duration,
            error: error.as_ref().map(SerializedError::from),
        }
    }

    async fn execute_story(
        &self,
        story: &Story,
        gate: Arc<dyn Gate>,
    ) -> Result<(), (StoryStatus, StoryError)> {
        if self.config.check_scope {
            self.check_scope(story)
                .await
                .map_err(|e| (StoryStatus::Failed, e))?;
        }

        let result = gate.run().await;
        if !result.is_success() {
            let status = StoryStatus::from(result.status);
            let error = match result.error {
                Some(error) => StoryError::Gate(error),
                None => StoryError::GateReported(result.status),
            };
            return Err((status, error));
        }

        if story.require_evidence && !result.evidence.has_positive_signal() {
            return Err((StoryStatus::Failed, StoryError::NoPositiveEvidence));
        }
        Ok(())
    }

    async fn check_scope(&self, story: &Story) -> Result<(), StoryError> {
        let Some(source) = &self.diff_source else {
            return Ok(());
        };
        let diff = source
            .diff_stats(&self.config.base_ref)
            .await
            .map_err(|e| StoryError::DiffUnavailable(e.to_string()))?;

        let scope = story.scope.clone().unwrap_or_default();
        let violations = scope.validate(&diff);
        debug!(
            story = %story.id,
            files = diff.files.len(),
            violations = violations.len(),
            "Scope checked"
        );
        if violations.is_empty() {
            Ok(())
        } else {
            Err(StoryError::Scope(violations))
        }
    }
}

impl std::fmt::Debug for PrdRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrdRunner")
            .field("registry", &self.registry)
            .field("diff_source", &self.diff_source.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Write `report` as pretty JSON, creating parent directories.
pub async fn write_report(path: &std::path::Path, report: &PrdReport) -> Result<(), RuntimeError> {
    let failed = |reason: String| RuntimeError::ReportWrite {
        path: path.to_path_buf(),
        reason,
    };

    let json = report.to_json_pretty().map_err(|e| failed(e.to_string()))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(e.to_string()))?;
    }
    tokio::fs::write(path, json)
        .await
        .map_err(|e| failed(e.to_string()))?;

    info!(path = %path.display(), "Report written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::gate_fn;
    use crate::vcs::VcsError;
    use async_trait::async_trait;
    use attest_core::{DiffStats, FileChange, GateResult, GateStatus, Log, LogStatus, Scope};

    fn passing() -> Arc<dyn Gate> {
        Arc::new(gate_fn(|| async {
            GateResult::success(
                vec![Log::new("auth", "login", LogStatus::Success)],
                Duration::ZERO,
            )
        }))
    }

    fn empty_success() -> Arc<dyn Gate> {
        Arc::new(gate_fn(|| async { GateResult::success(vec![], Duration::ZERO) }))
    }

    fn runner_for(gates: Vec<(&str, Arc<dyn Gate>)>) -> PrdRunner {
        let mut registry = GateRegistry::new();
        for (id, gate) in gates {
            registry.register(id, gate);
        }
        PrdRunner::new(registry)
    }

    struct FixedDiff(Result<DiffStats, VcsError>);

    #[async_trait]
    impl DiffSource for FixedDiff {
        async fn diff_stats(&self, _base_ref: &str) -> Result<DiffStats, VcsError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_require_evidence_rejects_empty_success() {
        let mut strict = Story::new("A", "strict", "a.yaml");
        strict.require_evidence = true;
        let prd = Prd::new(vec![strict]);

        let report = runner_for(vec![("A", empty_success())]).run(&prd).await.unwrap();
        assert!(!report.success);
        assert_eq!(report.failed_story.as_deref(), Some("A"));
        assert_eq!(report.stories[0].error.as_ref().unwrap().tag, "NoPositiveEvidence");

        let report = runner_for(vec![("A", passing())]).run(&prd).await.unwrap();
        assert!(report.success);
    }

    #[tokio::test]
    async fn test_failed_status_without_error_is_reported() {
        let quiet_failure: Arc<dyn Gate> = Arc::new(gate_fn(|| async {
            GateResult {
                status: GateStatus::Failed,
                ..GateResult::success(vec![], Duration::ZERO)
            }
        }));
        let prd = Prd::new(vec![Story::new("A", "a", "a.yaml")]);

        let report = runner_for(vec![("A", quiet_failure)]).run(&prd).await.unwrap();
        assert_eq!(report.stories[0].status, StoryStatus::Failed);
        assert_eq!(report.stories[0].error.as_ref().unwrap().tag, "GateFailed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_story_timeout() {
        let slow: Arc<dyn Gate> = Arc::new(gate_fn(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            GateResult::success(vec![], Duration::ZERO)
        }));
        let prd = Prd::new(vec![Story::new("A", "a", "a.yaml")]);
        let runner = runner_for(vec![("A", slow)]).with_config(RunnerConfig {
            story_timeout: Some(Duration::from_secs(5)),
            ..RunnerConfig::default()
        });

        let report = runner.run(&prd).await.unwrap();
        assert_eq!(report.stories[0].status, StoryStatus::Timeout);
        assert_eq!(report.stories[0].error.as_ref().unwrap().tag, "StoryTimeout");
    }

    #[tokio::test]
    async fn test_check_scope_requires_diff_source() {
        let prd = Prd::new(vec![Story::new("A", "a", "a.yaml")]);
        let runner = runner_for(vec![("A", passing())]).with_config(RunnerConfig {
            check_scope: true,
            ..RunnerConfig::default()
        });
        assert!(matches!(runner.run(&prd).await, Err(RuntimeError::NoDiffSource)));
    }

    #[tokio::test]
    async fn test_scope_violation_skips_gate() {
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        let gate: Arc<dyn Gate> = Arc::new(gate_fn(move || {
            let flag = flag.clone();
            async move {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                GateResult::success(vec![], Duration::ZERO)
            }
        }));

        let story = Story::new("A", "a", "a.yaml").with_scope(Scope {
            allowed_paths: vec!["src/**".to_string()],
            ..Scope::default()
        });
        let diff = DiffStats {
            files: vec![FileChange::new("src/a.ts", 1, 0), FileChange::new("docs/x.md", 1, 0)],
        };
        let runner = runner_for(vec![("A", gate)])
            .with_diff_source(Arc::new(FixedDiff(Ok(diff))))
            .with_config(RunnerConfig {
                check_scope: true,
                ..RunnerConfig::default()
            });

        let report = runner.run(&Prd::new(vec![story])).await.unwrap();
        assert_eq!(report.stories[0].error.as_ref().unwrap().tag, "ScopeViolation");
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unreadable_diff_fails_story() {
        let runner = runner_for(vec![("A", passing())])
            .with_diff_source(Arc::new(FixedDiff(Err(VcsError::Spawn("no git".to_string())))))
            .with_config(RunnerConfig {
                check_scope: true,
                ..RunnerConfig::default()
            });
        let report = runner
            .run(&Prd::new(vec![Story::new("A", "a", "a.yaml")]))
            .await
            .unwrap();
        assert_eq!(report.stories[0].error.as_ref().unwrap().tag, "DiffUnavailable");
    }

    #[tokio::test]
    async fn test_report_written_to_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/reports/prd.json");
        let runner = runner_for(vec![("A", passing())]).with_config(RunnerConfig {
            report_path: Some(path.clone()),
            ..RunnerConfig::default()
        });

        let report = runner
            .run(&Prd::new(vec![Story::new("A", "a", "a.yaml")]))
            .await
            .unwrap();
        let written: PrdReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, report);
    }
}
