//! Gate orchestration.
//!
//! One run walks a fixed state machine:
//!
//! ```text
//! start backend -> preflight? -> actions -> settle -> collect -> assert -> stop backend
//! ```
//!
//! The backend is stopped exactly once on every path out of the run,
//! including panics inside any phase. A failed stop is logged and never
//! replaces the run's own outcome.

use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use attest_core::{
    duration_ms, Action, GateError, GateResult, Log, ObservabilityError, StopPolicy,
};

use crate::actions::{self, ActionContext, AgentRuntime, BrowserDriver, ProcessBrowserDriver};
use crate::assertions::{evaluate_assertions, Assertion};
use crate::backend::{Backend, EvidenceStream, LogSink};
use crate::collector::collect_evidence;
use crate::config::RuntimeConfig;
use crate::panic_message;
use crate::preflight::{AskPolicy, Preflight, PreflightDecision, PreflightRequest};

/// Everything one gate run needs.
pub struct GateSpec {
    pub name: String,
    pub preflight: Option<Arc<dyn Preflight>>,

    /// Exclusively owned by this run
    pub backend: Box<dyn Backend>,

    pub actions: Vec<Action>,
    pub assertions: Vec<Assertion>,
    pub stop: StopPolicy,
    pub max_logs: Option<usize>,
}

impl GateSpec {
    pub fn new(name: impl Into<String>, backend: impl Backend + 'static) -> Self {
        Self {
            name: name.into(),
            preflight: None,
            backend: Box::new(backend),
            actions: Vec::new(),
            assertions: Vec::new(),
            stop: StopPolicy::default(),
            max_logs: None,
        }
    }

    pub fn with_preflight(mut self, preflight: Arc<dyn Preflight>) -> Self {
        self.preflight = Some(preflight);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_assertion(mut self, assertion: Assertion) -> Self {
        self.assertions.push(assertion);
        self
    }

    pub fn with_stop(mut self, stop: StopPolicy) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_max_logs(mut self, max_logs: usize) -> Self {
        self.max_logs = Some(max_logs);
        self
    }
}

type PhaseResult = Result<Vec<Log>, (GateError, Vec<Log>)>;

/// Runs gate specs with shared collaborators.
#[derive(Clone)]
pub struct GateRunner {
    config: Arc<RuntimeConfig>,
    browser: Arc<dyn BrowserDriver>,
    agent_runtime: Option<Arc<dyn AgentRuntime>>,
    ask_policy: AskPolicy,
}

impl GateRunner {
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        Self {
            browser: Arc::new(ProcessBrowserDriver::new(config.browser.program.clone())),
            agent_runtime: None,
            ask_policy: config.ask_policy,
            config,
        }
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserDriver>) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_agent_runtime(mut self, runtime: Arc<dyn AgentRuntime>) -> Self {
        self.agent_runtime = Some(runtime);
        self
    }

    pub fn with_ask_policy(mut self, policy: AskPolicy) -> Self {
        self.ask_policy = policy;
        self
    }

    pub fn config(&self) -> &Arc<RuntimeConfig> {
        &self.config
    }

    pub fn ask_policy(&self) -> AskPolicy {
        self.ask_policy
    }

    /// Run one gate to completion.
    pub async fn run(&self, spec: GateSpec) -> GateResult {
        let started = Instant::now();
        let GateSpec {
            name,
            preflight,
            backend,
            actions,
            assertions,
            stop,
            max_logs,
        } = spec;
        info!(
            gate = %name,
            backend = backend.name(),
            actions = actions.len(),
            "Gate started"
        );

        let mut guard = BackendGuard::new(&name, backend);
        let phases = self.run_phases(
            &name,
            preflight.as_deref(),
            &mut guard,
            &actions,
            &assertions,
            stop,
            max_logs,
        );
        let outcome = match AssertUnwindSafe(phases).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => Err((
                GateError::Panicked {
                    message: panic_message(payload.as_ref()),
                },
                Vec::new(),
            )),
        };
        guard.release().await;

        let duration = started.elapsed();
        let result = match outcome {
            Ok(logs) => GateResult::success(logs, duration),
            Err((error, logs)) => GateResult::failure(error, logs, duration),
        };
        match &result.error {
            None => info!(
                gate = %name,
                logs = result.logs.len(),
                duration_ms = duration_ms(duration),
                "Gate passed"
            ),
            Some(e) => warn!(
                gate = %name,
                status = result.status.as_str(),
                tag = e.tag(),
                error = %e,
                "Gate did not pass"
            ),
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_phases(
        &self,
        name: &str,
        preflight: Option<&dyn Preflight>,
        backend: &mut BackendGuard,
        actions: &[Action],
        assertions: &[Assertion],
        stop: StopPolicy,
        max_logs: Option<usize>,
    ) -> PhaseResult {
        let mut stream = backend
            .start()
            .await
            .map_err(|e| (GateError::from(e), Vec::new()))?;
        debug!(gate = %name, "Backend started");

        if let Some(preflight) = preflight {
            self.check_preflight(name, preflight, actions)
                .await
                .map_err(|e| (e, Vec::new()))?;
        }

        let ctx = ActionContext::new(Arc::clone(&self.config))
            .with_sink(backend.sink())
            .with_browser(Arc::clone(&self.browser))
            .with_agent_runtime(self.agent_runtime.clone());
        for (index, action) in actions.iter().enumerate() {
            actions::execute(action, &ctx)
                .await
                .map_err(|source| (GateError::Action { index, source }, Vec::new()))?;
        }

        tokio::time::sleep(self.config.settle_delay).await;

        let logs = collect_evidence(&mut stream, stop, max_logs)
            .await
            .map_err(|timeout| {
                let error = GateError::Timeout {
                    after_ms: duration_ms(timeout.elapsed),
                    collected: timeout.logs.len(),
                    cause: timeout.cause,
                };
                (error, timeout.logs)
            })?;
        debug!(gate = %name, collected = logs.len(), "Evidence collected");

        match evaluate_assertions(&logs, assertions).await {
            Ok(()) => Ok(logs),
            Err(failure) => Err((GateError::Assertion(failure), logs)),
        }
    }

    async fn check_preflight(
        &self,
        name: &str,
        preflight: &dyn Preflight,
        actions: &[Action],
    ) -> Result<(), GateError> {
        let request = PreflightRequest {
            gate_name: name,
            actions,
        };
        match preflight.check(request).await {
            PreflightDecision::Allow => {
                debug!(gate = %name, preflight = preflight.name(), "Preflight allowed");
                Ok(())
            }
            PreflightDecision::Deny { reason } => Err(GateError::PreflightDenied { reason }),
            PreflightDecision::Ask { reason } => match self.ask_policy {
                AskPolicy::Proceed => {
                    warn!(
                        gate = %name,
                        preflight = preflight.name(),
                        reason = %reason,
                        "Preflight asked for confirmation; proceeding"
                    );
                    Ok(())
                }
                AskPolicy::Deny => Err(GateError::PreflightDenied {
                    reason: format!("confirmation required: {}", reason),
                }),
            },
        }
    }
}

/// Owns a run's backend and stops it exactly once.
///
/// When the run future is dropped before it finishes, as a story deadline
/// does, the stop is handed to a task on the current runtime.
struct BackendGuard {
    gate: String,
    backend_name: String,
    backend: Option<Box<dyn Backend>>,
}

impl BackendGuard {
    fn new(gate: &str, backend: Box<dyn Backend>) -> Self {
        Self {
            gate: gate.to_string(),
            backend_name: backend.name().to_string(),
            backend: Some(backend),
        }
    }

    async fn start(&mut self) -> Result<EvidenceStream, ObservabilityError> {
        match self.backend.as_mut() {
            Some(backend) => backend.start().await,
            None => Err(ObservabilityError::new(
                &self.backend_name,
                "backend already released",
            )),
        }
    }

    fn sink(&self) -> Option<LogSink> {
        self.backend.as_ref().and_then(|backend| backend.sink())
    }

    async fn release(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            stop_backend(&self.gate, backend.as_mut()).await;
        }
    }
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };
        let gate = std::mem::take(&mut self.gate);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(gate = %gate, "Gate run cancelled, stopping backend in the background");
                handle.spawn(async move {
                    stop_backend(&gate, backend.as_mut()).await;
                });
            }
            Err(_) => warn!(
                gate = %gate,
                "Gate run dropped outside a runtime, backend not stopped"
            ),
        }
    }
}

/// Stop a backend, logging failures and panics instead of propagating them.
async fn stop_backend(gate: &str, backend: &mut dyn Backend) {
    match AssertUnwindSafe(backend.stop()).catch_unwind().await {
        Ok(Ok(())) => debug!(gate = %gate, "Backend stopped"),
        Ok(Err(e)) => warn!(gate = %gate, error = %e, "Failed to stop backend"),
        Err(payload) => warn!(
            gate = %gate,
            panic = %panic_message(payload.as_ref()),
            "Backend panicked while stopping"
        ),
    }
}

/// A verification unit: a zero-argument run producing a result.
#[async_trait]
pub trait Gate: Send + Sync {
    async fn run(&self) -> GateResult;
}

/// Gate built from a spec factory; every run gets a fresh backend.
pub struct SpecGate<F> {
    runner: GateRunner,
    factory: F,
}

impl<F> SpecGate<F>
where
    F: Fn() -> GateSpec + Send + Sync,
{
    pub fn new(runner: GateRunner, factory: F) -> Self {
        Self { runner, factory }
    }
}

#[async_trait]
impl<F> Gate for SpecGate<F>
where
    F: Fn() -> GateSpec + Send + Sync,
{
    async fn run(&self) -> GateResult {
        let spec = (self.factory)();
        self.runner.run(spec).await
    }
}

/// Gate backed by an async closure.
pub struct FnGate<F>(F);

/// Wrap an async closure as a [`Gate`].
pub fn gate_fn<F, Fut>(f: F) -> FnGate<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = GateResult> + Send,
{
    FnGate(f)
}

#[async_trait]
impl<F, Fut> Gate for FnGate<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = GateResult> + Send,
{
    async fn run(&self) -> GateResult {
        (self.0)().await
    }
}
