//! Shell command execution.
//!
//! Output is read line by line while the child runs. When a sink is given,
//! each line is forwarded as evidence: lines that already are JSON evidence
//! events pass through unchanged, anything else becomes an `info` event.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use attest_core::{ActionError, ActionKind, Log, LogStatus};

use crate::backend::LogSink;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` through `<shell> -c`, bounded by `limit`.
///
/// The child is killed if the limit passes or the future is dropped.
pub async fn run_exec(
    shell: &str,
    command: &str,
    cwd: Option<&str>,
    limit: Duration,
    sink: Option<&LogSink>,
) -> Result<ExecOutput, ActionError> {
    info!(command = %command, "Executing command");

    let mut cmd = Command::new(shell);
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        debug!(cwd = %dir, "Working directory");
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| ActionError::Spawn {
        command: command.to_string(),
        reason: e.to_string(),
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let run = async {
        let (out, err) = tokio::join!(
            pump(stdout, "stdout", sink),
            pump(stderr, "stderr", sink)
        );
        let status = child.wait().await;
        (out, err, status)
    };

    let (stdout, stderr, status) = match tokio::time::timeout(limit, run).await {
        Ok(finished) => finished,
        Err(_) => {
            warn!(command = %command, limit_ms = limit.as_millis() as u64, "Command timed out");
            return Err(ActionError::Timeout {
                kind: ActionKind::Exec,
                after: limit,
            });
        }
    };

    let status = status.map_err(|e| ActionError::Failed {
        kind: ActionKind::Exec,
        message: format!("failed to wait for command: {}", e),
    })?;

    if !status.success() {
        return Err(ActionError::NonZeroExit {
            command: command.to_string(),
            code: status.code(),
            stderr: stderr.trim_end().to_string(),
        });
    }

    Ok(ExecOutput {
        code: status.code(),
        stdout,
        stderr,
    })
}

/// Read a pipe to the end, forwarding each line to `sink`.
async fn pump<R>(pipe: Option<R>, stream: &str, sink: Option<&LogSink>) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(pipe) = pipe else {
        return String::new();
    };

    let mut captured = String::new();
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(sink) = sink {
                    sink.emit(line_to_log(&line, stream));
                }
                captured.push_str(&line);
                captured.push('\n');
            }
            Ok(None) => break,
            Err(e) => {
                debug!(stream, error = %e, "Stopped reading command output");
                break;
            }
        }
    }
    captured
}

fn line_to_log(line: &str, stream: &str) -> Log {
    if line.trim_start().starts_with('{') {
        if let Ok(log) = serde_json::from_str::<Log>(line) {
            return log;
        }
    }
    Log::new("exec", stream, LogStatus::Info).with_data(serde_json::json!({ "line": line }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, ChannelBackend};

    const LIMIT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_captures_stdout() {
        let output = run_exec("sh", "echo hello", None, LIMIT, None).await.unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.code, Some(0));
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_stderr() {
        let err = run_exec("sh", "echo broken >&2; exit 3", None, LIMIT, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ActionError::NonZeroExit {
                command: "echo broken >&2; exit 3".to_string(),
                code: Some(3),
                stderr: "broken".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let err = run_exec("sh", "sleep 5", None, Duration::from_millis(100), None)
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "ActionTimeout");
    }

    #[tokio::test]
    async fn test_missing_shell_is_spawn_error() {
        let err = run_exec("/nonexistent/shell", "true", None, LIMIT, None)
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "ActionSpawn");
    }

    #[tokio::test]
    async fn test_output_lines_reach_sink() {
        let backend = ChannelBackend::new("local", 16);
        let sink = backend.sink().unwrap();
        let buffer = backend.buffer();
        let json = concat!(
            r#"{"timestamp":"2024-01-01T00:00:00Z","#,
            r#""stage":"api","action":"login","status":"success"}"#
        );
        let command = format!("echo plain; echo '{}'", json);
        run_exec("sh", &command, None, LIMIT, Some(&sink)).await.unwrap();
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_line_to_log() {
        let plain = line_to_log("ready on :8080", "stdout");
        assert_eq!(plain.stage, "exec");
        assert_eq!(plain.action, "stdout");
        assert_eq!(plain.data.unwrap()["line"], "ready on :8080");

        let forwarded = line_to_log(
            concat!(
                r#"{"timestamp":"2024-01-01T00:00:00Z","#,
                r#""stage":"api","action":"login","status":"error"}"#
            ),
            "stdout",
        );
        assert_eq!(forwarded.stage, "api");
        assert_eq!(forwarded.status, LogStatus::Error);
    }
}
