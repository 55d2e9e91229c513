//! Gate results and their versioned report shape.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, SerializedError};
use crate::evidence::{EvidenceSummary, Log};

/// Version stamped on every serialized report.
pub const REPORT_VERSION: &str = "1";

/// When to stop collecting evidence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StopPolicy {
    /// Quiet period after the last event that ends collection
    pub idle_ms: u64,

    /// Absolute collection deadline
    pub max_ms: u64,
}

impl StopPolicy {
    pub fn new(idle_ms: u64, max_ms: u64) -> Self {
        Self { idle_ms, max_ms }
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            idle_ms: 2_000,
            max_ms: 30_000,
        }
    }
}

/// Outcome of a gate run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Success,
    Failed,
    Timeout,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStatus::Success => "success",
            GateStatus::Failed => "failed",
            GateStatus::Timeout => "timeout",
        }
    }
}

/// Result of one gate run.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub status: GateStatus,
    pub duration: Duration,

    /// Every captured event, in arrival order
    pub logs: Vec<Log>,

    /// Computed once from `logs`
    pub evidence: EvidenceSummary,

    pub error: Option<GateError>,
}

impl GateResult {
    /// A successful result over the final log list.
    pub fn success(logs: Vec<Log>, duration: Duration) -> Self {
        let evidence = EvidenceSummary::from_logs(&logs);
        Self {
            status: GateStatus::Success,
            duration,
            logs,
            evidence,
            error: None,
        }
    }

    /// A failed (or timed-out) result.
    ///
    /// The status follows the error: evidence timeouts report `timeout`,
    /// everything else `failed`. Whatever logs were captured are kept for
    /// diagnosis, but the summary is empty.
    pub fn failure(error: GateError, logs: Vec<Log>, duration: Duration) -> Self {
        let status = match error {
            GateError::Timeout { .. } => GateStatus::Timeout,
            _ => GateStatus::Failed,
        };
        Self {
            status,
            duration,
            logs,
            evidence: EvidenceSummary::default(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == GateStatus::Success
    }

    /// Versioned, serializable form.
    pub fn to_report(&self) -> GateReport {
        GateReport {
            version: REPORT_VERSION.to_string(),
            status: self.status,
            duration_ms: duration_ms(self.duration),
            logs: self.logs.clone(),
            evidence: self.evidence.clone(),
            error: self.error.as_ref().map(SerializedError::from),
        }
    }
}

/// Serialized gate result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GateReport {
    pub version: String,
    pub status: GateStatus,
    pub duration_ms: u64,
    pub logs: Vec<Log>,
    pub evidence: EvidenceSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SerializedError>,
}

/// Saturating millisecond conversion for reports.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::LogStatus;

    #[test]
    fn test_timeout_error_sets_timeout_status() {
        let result = GateResult::failure(
            GateError::Timeout {
                after_ms: 100,
                collected: 0,
                cause: None,
            },
            vec![],
            Duration::from_millis(100),
        );
        assert_eq!(result.status, GateStatus::Timeout);
        assert!(result.evidence.is_empty());
    }

    #[test]
    fn test_failure_keeps_logs_but_not_summary() {
        let logs = vec![Log::new("api", "login", LogStatus::Success)];
        let result = GateResult::failure(
            GateError::Panicked {
                message: "boom".to_string(),
            },
            logs,
            Duration::from_millis(1),
        );
        assert_eq!(result.status, GateStatus::Failed);
        assert_eq!(result.logs.len(), 1);
        assert!(result.evidence.is_empty());
    }

    #[test]
    fn test_report_shape() {
        let logs = vec![
            Log::new("b-stage", "z-action", LogStatus::Success),
            Log::new("a-stage", "y-action", LogStatus::Success),
        ];
        let report = GateResult::success(logs, Duration::from_millis(42)).to_report();
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["version"], "1");
        assert_eq!(json["status"], "success");
        assert_eq!(json["durationMs"], 42);
        assert_eq!(json["evidence"]["stagesSeen"][0], "a-stage");
        assert_eq!(json["evidence"]["actionsSeen"][1], "z-action");
        assert!(json.get("error").is_none());
    }
}
