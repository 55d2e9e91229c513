//! Browser navigation.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use attest_core::{ActionError, ActionKind};

/// Opens browser sessions.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn open(&self, headless: bool) -> Result<Box<dyn BrowserSession>, ActionError>;
}

/// One open browser.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), ActionError>;

    /// Release the browser. Always called once the session is open.
    async fn close(&mut self) -> Result<(), ActionError>;
}

/// Open a session, navigate, hold for `hold`, then close the session.
///
/// The session is closed on every path, including navigation failures and
/// the overall `hold + slack` deadline.
pub(crate) async fn run_browse(
    driver: &dyn BrowserDriver,
    url: &str,
    headless: bool,
    hold: Duration,
    slack: Duration,
) -> Result<(), ActionError> {
    let bound = hold + slack;
    let mut session: Option<Box<dyn BrowserSession>> = None;

    let outcome = tokio::time::timeout(bound, async {
        let opened = session.insert(driver.open(headless).await?);
        opened.navigate(url).await?;
        debug!(url = %url, hold_ms = hold.as_millis() as u64, "Holding page");
        tokio::time::sleep(hold).await;
        Ok::<(), ActionError>(())
    })
    .await;

    if let Some(mut open) = session.take() {
        match tokio::time::timeout(slack, open.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to close browser session"),
            Err(_) => warn!("Timed out closing browser session"),
        }
    }

    match outcome {
        Ok(result) => result,
        Err(_) => Err(ActionError::Timeout {
            kind: ActionKind::Browse,
            after: bound,
        }),
    }
}

/// Drives a locally installed Chromium-compatible browser as a process.
#[derive(Debug, Clone)]
pub struct ProcessBrowserDriver {
    program: String,
}

impl ProcessBrowserDriver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl BrowserDriver for ProcessBrowserDriver {
    async fn open(&self, headless: bool) -> Result<Box<dyn BrowserSession>, ActionError> {
        Ok(Box::new(ProcessSession {
            program: self.program.clone(),
            headless,
            child: None,
        }))
    }
}

struct ProcessSession {
    program: String,
    headless: bool,
    child: Option<Child>,
}

#[async_trait]
impl BrowserSession for ProcessSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ActionError> {
        if let Some(mut previous) = self.child.take() {
            let _ = previous.kill().await;
        }

        let mut cmd = Command::new(&self.program);
        if self.headless {
            cmd.arg("--headless=new").arg("--disable-gpu");
        }
        cmd.arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ActionError::Spawn {
            command: self.program.clone(),
            reason: e.to_string(),
        })?;

        // A browser that exits right away never loaded the page.
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(Some(status)) = child.try_wait() {
            if !status.success() {
                return Err(ActionError::Failed {
                    kind: ActionKind::Browse,
                    message: format!("browser exited with {} while loading {}", status, url),
                });
            }
        }

        self.child = Some(child);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ActionError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(Some(_)) => Ok(()),
            _ => child.kill().await.map_err(|e| ActionError::Failed {
                kind: ActionKind::Browse,
                message: format!("failed to stop browser: {}", e),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    struct FakeDriver {
        recorder: Arc<Recorder>,
        fail_navigation: bool,
        hang: bool,
    }

    struct FakeSession {
        recorder: Arc<Recorder>,
        fail_navigation: bool,
        hang: bool,
    }

    #[async_trait]
    impl BrowserDriver for FakeDriver {
        async fn open(&self, headless: bool) -> Result<Box<dyn BrowserSession>, ActionError> {
            self.recorder.events.lock().push(format!("open headless={}", headless));
            Ok(Box::new(FakeSession {
                recorder: Arc::clone(&self.recorder),
                fail_navigation: self.fail_navigation,
                hang: self.hang,
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn navigate(&mut self, url: &str) -> Result<(), ActionError> {
            self.recorder.events.lock().push(format!("navigate {}", url));
            if self.hang {
                futures::future::pending::<()>().await;
            }
            if self.fail_navigation {
                return Err(ActionError::Failed {
                    kind: ActionKind::Browse,
                    message: "net::ERR_CONNECTION_REFUSED".to_string(),
                });
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ActionError> {
            self.recorder.events.lock().push("close".to_string());
            Ok(())
        }
    }

    fn driver(fail_navigation: bool, hang: bool) -> (FakeDriver, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (
            FakeDriver {
                recorder: Arc::clone(&recorder),
                fail_navigation,
                hang,
            },
            recorder,
        )
    }

    const HOLD: Duration = Duration::from_millis(500);
    const SLACK: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_session_closed_after_success() {
        let (driver, recorder) = driver(false, false);
        run_browse(&driver, "http://localhost:3000", true, HOLD, SLACK)
            .await
            .unwrap();
        assert_eq!(
            *recorder.events.lock(),
            vec!["open headless=true", "navigate http://localhost:3000", "close"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_closed_after_navigation_failure() {
        let (driver, recorder) = driver(true, false);
        let err = run_browse(&driver, "http://localhost:1", false, HOLD, SLACK)
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "ActionFailed");
        assert_eq!(recorder.events.lock().last().map(String::as_str), Some("close"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_navigation_times_out_and_closes() {
        let (driver, recorder) = driver(false, true);
        let err = run_browse(&driver, "http://localhost:3000", true, HOLD, SLACK)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ActionError::Timeout {
                kind: ActionKind::Browse,
                after: HOLD + SLACK,
            }
        );
        assert_eq!(recorder.events.lock().last().map(String::as_str), Some("close"));
    }
}
