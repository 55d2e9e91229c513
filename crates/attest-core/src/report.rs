//! Versioned PRD report model and console rendering.
//!
//! Reports hold no live errors, only [`SerializedError`] values, so they can
//! be written, diffed and read back by external tooling.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::error::SerializedError;
use crate::gate::{GateReport, GateResult, GateStatus, REPORT_VERSION};

/// Outcome of one story.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoryStatus {
    Success,
    Failed,
    Timeout,
}

impl From<GateStatus> for StoryStatus {
    fn from(status: GateStatus) -> Self {
        match status {
            GateStatus::Success => StoryStatus::Success,
            GateStatus::Failed => StoryStatus::Failed,
            GateStatus::Timeout => StoryStatus::Timeout,
        }
    }
}

/// Recorded result of one executed story.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoryResult {
    pub id: String,
    pub title: String,
    pub gate_file: String,
    pub status: StoryStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SerializedError>,
}

impl StoryResult {
    pub fn is_success(&self) -> bool {
        self.status == StoryStatus::Success
    }
}

/// Report for a full PRD run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrdReport {
    pub version: String,
    pub success: bool,
    pub stories: Vec<StoryResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_story: Option<String>,
    pub total_duration_ms: u64,
}

impl PrdReport {
    pub fn new(
        stories: Vec<StoryResult>,
        failed_story: Option<String>,
        total_duration_ms: u64,
    ) -> Self {
        Self {
            version: REPORT_VERSION.to_string(),
            success: failed_story.is_none() && stories.iter().all(StoryResult::is_success),
            stories,
            failed_story,
            total_duration_ms,
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Console output flavour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Human,
    Json,
}

fn status_marker(ok: bool) -> &'static str {
    if ok {
        "PASS"
    } else {
        "FAIL"
    }
}

/// Render a gate result for the console.
pub fn render_gate_result(name: &str, result: &GateResult, format: ReportFormat) -> String {
    match format {
        ReportFormat::Json => render_json(&result.to_report()),
        ReportFormat::Human => {
            let mut out = String::new();
            let _ = writeln!(
                out,
                "[{}] {} ({}, {}ms)",
                status_marker(result.is_success()),
                name,
                result.status.as_str(),
                result.duration.as_millis()
            );
            let _ = writeln!(out, "  logs: {}", result.logs.len());
            let ev = &result.evidence;
            for (label, set) in [
                ("stages", &ev.stages_seen),
                ("actions", &ev.actions_seen),
                ("requests", &ev.request_ids),
                ("errors", &ev.error_tags),
            ] {
                if !set.is_empty() {
                    let items: Vec<&str> = set.iter().map(String::as_str).collect();
                    let _ = writeln!(out, "  {}: {}", label, items.join(", "));
                }
            }
            if let Some(error) = &result.error {
                let _ = writeln!(out, "  error [{}]: {}", error.tag(), error);
            }
            out
        }
    }
}

/// Render a PRD report for the console.
pub fn render_prd_report(report: &PrdReport, format: ReportFormat) -> String {
    match format {
        ReportFormat::Json => render_json(report),
        ReportFormat::Human => {
            let mut out = String::new();
            for story in &report.stories {
                let _ = writeln!(
                    out,
                    "[{}] {} - {} ({}ms)",
                    status_marker(story.is_success()),
                    story.id,
                    story.title,
                    story.duration_ms
                );
                if let Some(error) = &story.error {
                    let _ = writeln!(out, "    {}: {}", error.tag, error.message);
                }
            }
            let summary = match &report.failed_story {
                Some(id) => format!("FAILED at story {}", id),
                None if report.success => "ALL STORIES PASSED".to_string(),
                None => "FAILED".to_string(),
            };
            let _ = writeln!(
                out,
                "{} ({} stories, {}ms)",
                summary,
                report.stories.len(),
                report.total_duration_ms
            );
            out
        }
    }
}

fn render_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"renderError\":\"{}\"}}", e))
}

/// Parse a gate report back from JSON.
pub fn parse_gate_report(json: &str) -> Result<GateReport, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GateError;
    use std::time::Duration;

    fn story(id: &str, status: StoryStatus) -> StoryResult {
        StoryResult {
            id: id.to_string(),
            title: format!("Story {}", id),
            gate_file: format!("gates/{}.yaml", id),
            status,
            duration_ms: 10,
            error: None,
        }
    }

    #[test]
    fn test_report_json_shape() {
        let report = PrdReport::new(
            vec![story("A", StoryStatus::Success), story("B", StoryStatus::Failed)],
            Some("B".to_string()),
            25,
        );
        let json: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["version"], "1");
        assert_eq!(json["success"], false);
        assert_eq!(json["failedStory"], "B");
        assert_eq!(json["totalDurationMs"], 25);
        assert_eq!(json["stories"][0]["gateFile"], "gates/A.yaml");
        assert!(json["stories"][0].get("error").is_none());
    }

    #[test]
    fn test_success_requires_every_story() {
        let ok = PrdReport::new(vec![story("A", StoryStatus::Success)], None, 1);
        assert!(ok.success);
        let not_ok = PrdReport::new(vec![story("A", StoryStatus::Timeout)], None, 1);
        assert!(!not_ok.success);
    }

    #[test]
    fn test_render_gate_result_human() {
        let result = GateResult::failure(
            GateError::PreflightDenied {
                reason: "touches prod".to_string(),
            },
            vec![],
            Duration::from_millis(3),
        );
        let text = render_gate_result("deploy-check", &result, ReportFormat::Human);
        assert!(text.starts_with("[FAIL] deploy-check"));
        assert!(text.contains("PreflightDenied"));
    }

    #[test]
    fn test_gate_report_round_trips_through_json() {
        let result = GateResult::success(vec![], Duration::from_millis(5));
        let json = render_gate_result("g", &result, ReportFormat::Json);
        let parsed = parse_gate_report(&json).unwrap();
        assert_eq!(parsed.status, GateStatus::Success);
        assert_eq!(parsed.duration_ms, 5);
    }
}
