//! Pre-action safety checks.
//!
//! A preflight sees the gate's declared actions before any of them run and
//! returns a decision. DENY aborts the gate. What ASK does is decided by the
//! [`AskPolicy`] in effect: proceed with a warning, or treat it as DENY.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use attest_core::{Action, Authority};

/// Inputs to a preflight check.
#[derive(Debug, Clone, Copy)]
pub struct PreflightRequest<'a> {
    pub gate_name: &'a str,
    pub actions: &'a [Action],
}

/// Outcome of a preflight check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightDecision {
    Allow,
    Ask { reason: String },
    Deny { reason: String },
}

/// How ASK decisions are resolved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AskPolicy {
    /// Log a warning and continue
    #[default]
    Proceed,

    /// Treat as DENY
    Deny,
}

impl From<Authority> for AskPolicy {
    fn from(authority: Authority) -> Self {
        match authority {
            Authority::Autonomous => AskPolicy::Proceed,
            Authority::Supervised => AskPolicy::Deny,
        }
    }
}

#[async_trait]
pub trait Preflight: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, request: PreflightRequest<'_>) -> PreflightDecision;
}

/// Keyword rules over the textual form of each action.
///
/// A deny keyword anywhere wins over an ask keyword.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordPreflight {
    #[serde(default)]
    pub deny: Vec<String>,

    #[serde(default)]
    pub ask: Vec<String>,
}

impl KeywordPreflight {
    pub fn new(deny: Vec<String>, ask: Vec<String>) -> Self {
        Self { deny, ask }
    }

    fn describe(action: &Action) -> String {
        match action {
            Action::Wait { ms } => format!("wait {}", ms),
            Action::Exec { command, .. } => command.clone(),
            Action::Browse { url, .. } => url.clone(),
            Action::Deploy { target } => format!("deploy {}", target),
            Action::AgentRun { config } => format!("{} {}", config.image, config.prompt),
        }
    }

    fn first_hit<'a>(keywords: &'a [String], texts: &[String]) -> Option<(&'a str, usize)> {
        keywords.iter().find_map(|keyword| {
            texts
                .iter()
                .position(|t| t.contains(keyword.as_str()))
                .map(|index| (keyword.as_str(), index))
        })
    }
}

#[async_trait]
impl Preflight for KeywordPreflight {
    fn name(&self) -> &str {
        "keywords"
    }

    async fn check(&self, request: PreflightRequest<'_>) -> PreflightDecision {
        let texts: Vec<String> = request.actions.iter().map(Self::describe).collect();
        if let Some((keyword, index)) = Self::first_hit(&self.deny, &texts) {
            return PreflightDecision::Deny {
                reason: format!("action #{} matches deny rule '{}'", index, keyword),
            };
        }
        if let Some((keyword, index)) = Self::first_hit(&self.ask, &texts) {
            return PreflightDecision::Ask {
                reason: format!("action #{} matches ask rule '{}'", index, keyword),
            };
        }
        PreflightDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preflight() -> KeywordPreflight {
        KeywordPreflight::new(vec!["prod".to_string()], vec!["migrate".to_string()])
    }

    async fn decide(actions: &[Action]) -> PreflightDecision {
        preflight()
            .check(PreflightRequest {
                gate_name: "g",
                actions,
            })
            .await
    }

    #[tokio::test]
    async fn test_deny_wins_over_ask() {
        let decision = decide(&[Action::exec("npm run migrate"), Action::deploy("prod")]).await;
        assert!(matches!(decision, PreflightDecision::Deny { reason } if reason.contains("#1")));
    }

    #[tokio::test]
    async fn test_ask_and_allow() {
        assert!(matches!(
            decide(&[Action::exec("npm run migrate")]).await,
            PreflightDecision::Ask { .. }
        ));
        assert_eq!(decide(&[Action::wait(10)]).await, PreflightDecision::Allow);
    }

    #[test]
    fn test_authority_maps_to_policy() {
        assert_eq!(AskPolicy::from(Authority::Autonomous), AskPolicy::Proceed);
        assert_eq!(AskPolicy::from(Authority::Supervised), AskPolicy::Deny);
    }
}
