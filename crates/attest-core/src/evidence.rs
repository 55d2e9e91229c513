//! Evidence events and the summary derived from them.
//!
//! A [`Log`] is one observed fact emitted by a backend while a gate runs.
//! Logs are append-only: once received they are never modified.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status carried by an evidence event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Start,
    Success,
    Error,
    Info,
}

/// Error details attached to an evidence event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogError {
    /// Stable error tag (e.g., "DbTimeout")
    pub tag: String,

    /// Human-readable message
    pub message: String,
}

/// One observed fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    /// When the event was observed
    pub timestamp: DateTime<Utc>,

    /// Correlation id, if the system emitted one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Pipeline stage (e.g., "checkout", "exec")
    pub stage: String,

    /// Action name within the stage
    pub action: String,

    /// Outcome of the action
    pub status: LogStatus,

    /// Structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<LogError>,
}

impl Log {
    /// Create an event observed now.
    pub fn new(stage: impl Into<String>, action: impl Into<String>, status: LogStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: None,
            stage: stage.into(),
            action: action.into(),
            status,
            data: None,
            error: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attach a structured payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach an error and mark the event as failed.
    pub fn with_error(mut self, tag: impl Into<String>, message: impl Into<String>) -> Self {
        self.status = LogStatus::Error;
        self.error = Some(LogError {
            tag: tag.into(),
            message: message.into(),
        });
        self
    }

    /// Whether this event represents an error.
    ///
    /// An event counts as an error if its status says so or if it carries
    /// an error field, whatever its status.
    pub fn is_error(&self) -> bool {
        self.status == LogStatus::Error || self.error.is_some()
    }
}

/// Deduplicated, sorted view of a set of logs.
///
/// `BTreeSet` keeps every field lexicographically ordered, so serialized
/// summaries are reproducible regardless of arrival order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSummary {
    pub request_ids: BTreeSet<String>,
    pub stages_seen: BTreeSet<String>,
    pub actions_seen: BTreeSet<String>,
    pub error_tags: BTreeSet<String>,
}

impl EvidenceSummary {
    /// Compute the summary of a final log list.
    pub fn from_logs(logs: &[Log]) -> Self {
        let mut summary = Self::default();
        for log in logs {
            if let Some(id) = &log.request_id {
                summary.request_ids.insert(id.clone());
            }
            if !log.stage.is_empty() {
                summary.stages_seen.insert(log.stage.clone());
            }
            if !log.action.is_empty() {
                summary.actions_seen.insert(log.action.clone());
            }
            if let Some(error) = &log.error {
                summary.error_tags.insert(error.tag.clone());
            }
        }
        summary
    }

    /// Whether the logs contained any positive signal (an action or a stage).
    pub fn has_positive_signal(&self) -> bool {
        !self.actions_seen.is_empty() || !self.stages_seen.is_empty()
    }

    /// Whether nothing at all was observed.
    pub fn is_empty(&self) -> bool {
        self.request_ids.is_empty()
            && self.stages_seen.is_empty()
            && self.actions_seen.is_empty()
            && self.error_tags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_is_sorted_and_deduplicated() {
        let logs = vec![
            Log::new("payment", "charge", LogStatus::Success).with_request_id("r2"),
            Log::new("cart", "add", LogStatus::Start).with_request_id("r1"),
            Log::new("payment", "charge", LogStatus::Info).with_request_id("r2"),
            Log::new("cart", "add", LogStatus::Error).with_error("OutOfStock", "none left"),
        ];

        let summary = EvidenceSummary::from_logs(&logs);
        let stages: Vec<_> = summary.stages_seen.iter().cloned().collect();
        assert_eq!(stages, vec!["cart", "payment"]);
        let ids: Vec<_> = summary.request_ids.iter().cloned().collect();
        assert_eq!(ids, vec!["r1", "r2"]);
        assert!(summary.error_tags.contains("OutOfStock"));
        assert!(summary.has_positive_signal());
    }

    #[test]
    fn test_empty_summary() {
        let summary = EvidenceSummary::from_logs(&[]);
        assert!(summary.is_empty());
        assert!(!summary.has_positive_signal());
    }

    #[test]
    fn test_error_field_counts_as_error() {
        let mut log = Log::new("db", "query", LogStatus::Info);
        assert!(!log.is_error());
        log.error = Some(LogError {
            tag: "Slow".to_string(),
            message: "took 3s".to_string(),
        });
        assert!(log.is_error());
    }

    #[test]
    fn test_log_json_shape() {
        let json = concat!(
            r#"{"timestamp":"2026-01-01T00:00:00Z","requestId":"abc","#,
            r#""stage":"api","action":"login","status":"success"}"#
        );
        let log: Log = serde_json::from_str(json).unwrap();
        assert_eq!(log.request_id.as_deref(), Some("abc"));
        assert_eq!(log.status, LogStatus::Success);

        let back = serde_json::to_value(&log).unwrap();
        assert!(back.get("data").is_none());
        assert_eq!(back["requestId"], "abc");
    }
}
