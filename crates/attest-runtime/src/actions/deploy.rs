//! Deploy tool invocation.

use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

use attest_core::{ActionError, ActionKind};

use crate::config::DeployConfig;

/// Run the configured deploy program for `target` with inherited stdio.
///
/// One attempt; retries are applied by the caller.
pub async fn run_deploy(config: &DeployConfig, target: &str) -> Result<(), ActionError> {
    info!(target = %target, program = %config.program, "Deploying");

    let mut cmd = Command::new(&config.program);
    cmd.args(&config.args)
        .arg(target)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| ActionError::Spawn {
        command: config.program.clone(),
        reason: e.to_string(),
    })?;

    let status = match tokio::time::timeout(config.timeout, child.wait()).await {
        Ok(status) => status.map_err(|e| ActionError::Failed {
            kind: ActionKind::Deploy,
            message: format!("failed to wait for deploy: {}", e),
        })?,
        Err(_) => {
            let _ = child.kill().await;
            return Err(ActionError::Timeout {
                kind: ActionKind::Deploy,
                after: config.timeout,
            });
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(ActionError::NonZeroExit {
            command: format!("{} {}", config.program, target),
            code: status.code(),
            stderr: String::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use std::time::Duration;

    fn config(program: &str, args: &[&str]) -> DeployConfig {
        DeployConfig {
            program: program.to_string(),
            args: args.iter().map(|s| (*s).to_string()).collect(),
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::none(),
        }
    }

    #[tokio::test]
    async fn test_successful_deploy() {
        run_deploy(&config("true", &[]), "staging").await.unwrap();
    }

    #[tokio::test]
    async fn test_target_is_passed_as_last_argument() {
        // `sh -c 'test "$0" = staging' staging`
        let cfg = config("sh", &["-c", "test \"$0\" = staging"]);
        run_deploy(&cfg, "staging").await.unwrap();
        assert!(run_deploy(&cfg, "prod").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_deploy_reports_exit_code() {
        let err = run_deploy(&config("false", &[]), "staging").await.unwrap_err();
        assert!(matches!(err, ActionError::NonZeroExit { code: Some(1), .. }));
    }

    #[tokio::test]
    async fn test_deploy_timeout() {
        let mut cfg = config("sh", &["-c", "sleep 5"]);
        cfg.timeout = Duration::from_millis(100);
        let err = run_deploy(&cfg, "staging").await.unwrap_err();
        assert_eq!(err.tag(), "ActionTimeout");
    }
}
