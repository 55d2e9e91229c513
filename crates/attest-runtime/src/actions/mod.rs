//! Action execution.
//!
//! [`execute`] dispatches on the closed [`Action`] set. Each action is
//! validated statically first, then performed with its own timeout and
//! retry policy. Failures are always returned, never skipped.

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use attest_core::{Action, ActionError, ActionKind};

use crate::backend::LogSink;
use crate::config::{RetryPolicy, RuntimeConfig};

mod agent;
mod browse;
mod deploy;
mod exec;

pub use agent::{AgentOutput, AgentRuntime, ContainerAgentRuntime};
pub use browse::{BrowserDriver, BrowserSession, ProcessBrowserDriver};
pub use deploy::run_deploy;
pub use exec::{run_exec, ExecOutput};

/// Collaborators available to actions during one gate run.
#[derive(Clone)]
pub struct ActionContext {
    pub config: Arc<RuntimeConfig>,

    /// Evidence sink of the gate's backend, when it accepts local output
    pub sink: Option<LogSink>,

    pub browser: Arc<dyn BrowserDriver>,

    /// Required by `agent_run`; absent means such actions fail
    pub agent_runtime: Option<Arc<dyn AgentRuntime>>,
}

impl ActionContext {
    /// Context with the default process-backed browser and no agent runtime.
    pub fn new(config: Arc<RuntimeConfig>) -> Self {
        let browser = Arc::new(ProcessBrowserDriver::new(config.browser.program.clone()));
        Self {
            config,
            sink: None,
            browser,
            agent_runtime: None,
        }
    }

    pub fn with_sink(mut self, sink: Option<LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_browser(mut self, browser: Arc<dyn BrowserDriver>) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_agent_runtime(mut self, runtime: Option<Arc<dyn AgentRuntime>>) -> Self {
        self.agent_runtime = runtime;
        self
    }
}

/// Perform one action.
pub async fn execute(action: &Action, ctx: &ActionContext) -> Result<(), ActionError> {
    action.validate()?;
    let kind = action.kind();
    let started = Instant::now();
    debug!(action = %kind, "Executing action");

    let result = match action {
        Action::Wait { ms } => {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
            Ok(())
        }
        Action::Exec {
            command,
            cwd,
            timeout_ms,
        } => {
            let limit = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(ctx.config.exec.timeout);
            with_retry(kind, ctx.config.exec.retry, || {
                run_exec(
                    &ctx.config.exec.shell,
                    command,
                    cwd.as_deref(),
                    limit,
                    ctx.sink.as_ref(),
                )
            })
            .await
            .map(|output| {
                debug!(code = ?output.code, lines = output.stdout.lines().count(), "Exec finished");
            })
        }
        Action::Browse {
            url,
            headless,
            wait_ms,
        } => {
            let hold = wait_ms
                .map(Duration::from_millis)
                .unwrap_or(ctx.config.browser.default_wait);
            browse::run_browse(
                ctx.browser.as_ref(),
                url,
                headless.unwrap_or(true),
                hold,
                ctx.config.browser.slack,
            )
            .await
        }
        Action::Deploy { target } => {
            let deploy = &ctx.config.deploy;
            with_retry(kind, deploy.retry, || run_deploy(deploy, target)).await
        }
        Action::AgentRun { config } => match &ctx.agent_runtime {
            None => Err(ActionError::AgentRuntimeMissing),
            Some(runtime) => {
                let limit = config
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(ctx.config.agent.timeout);
                match tokio::time::timeout(limit, runtime.run(config)).await {
                    Ok(Ok(output)) => {
                        info!(
                            image = %config.image,
                            exit_code = ?output.exit_code,
                            "Agent run finished"
                        );
                        Ok(())
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(ActionError::Timeout { kind, after: limit }),
                }
            }
        },
    };

    match &result {
        Ok(()) => debug!(
            action = %kind,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Action succeeded"
        ),
        Err(e) => warn!(action = %kind, tag = e.tag(), error = %e, "Action failed"),
    }
    result
}

/// Run `op`, retrying retryable failures with exponential backoff.
pub(crate) async fn with_retry<T, F, Fut>(
    kind: ActionKind,
    policy: RetryPolicy,
    op: F,
) -> Result<T, ActionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ActionError>>,
{
    let backoff = ExponentialBuilder::default()
        .with_min_delay(policy.base_delay)
        .with_max_times(policy.max_retries);

    op.retry(backoff)
        .when(ActionError::is_retryable)
        .notify(|err: &ActionError, delay: Duration| {
            warn!(
                action = %kind,
                tag = err.tag(),
                retry_in_ms = delay.as_millis() as u64,
                "Retrying action"
            );
        })
        .await
}
