//! Assertions over collected evidence.
//!
//! Every assertion is evaluated; failures are aggregated rather than
//! reported first-only.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use attest_core::{AssertionFailure, EvidenceSummary, Log};

/// A possibly-suspending check over the whole evidence list.
#[async_trait]
pub trait EvidencePredicate: Send + Sync {
    async fn check(&self, logs: &[Log]) -> Result<(), String>;
}

struct SyncPredicate<F>(F);

#[async_trait]
impl<F> EvidencePredicate for SyncPredicate<F>
where
    F: Fn(&[Log]) -> Result<(), String> + Send + Sync,
{
    async fn check(&self, logs: &[Log]) -> Result<(), String> {
        (self.0)(logs)
    }
}

struct AsyncPredicate<F>(F);

#[async_trait]
impl<F> EvidencePredicate for AsyncPredicate<F>
where
    F: Fn(Vec<Log>) -> BoxFuture<'static, Result<(), String>> + Send + Sync,
{
    async fn check(&self, logs: &[Log]) -> Result<(), String> {
        (self.0)(logs.to_vec()).await
    }
}

/// Adapt a synchronous closure into a predicate.
pub fn predicate_fn<F>(f: F) -> Arc<dyn EvidencePredicate>
where
    F: Fn(&[Log]) -> Result<(), String> + Send + Sync + 'static,
{
    Arc::new(SyncPredicate(f))
}

/// One declared assertion.
#[derive(Clone)]
pub enum Assertion {
    /// No event has status `error` or an error field
    NoErrors,

    /// Some event has this action name
    HasAction(String),

    /// Some event has this stage
    HasStage(String),

    /// Named custom predicate
    Custom {
        name: String,
        predicate: Arc<dyn EvidencePredicate>,
    },
}

impl fmt::Debug for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assertion::NoErrors => write!(f, "NoErrors"),
            Assertion::HasAction(name) => f.debug_tuple("HasAction").field(name).finish(),
            Assertion::HasStage(name) => f.debug_tuple("HasStage").field(name).finish(),
            Assertion::Custom { name, .. } => f.debug_struct("Custom").field("name", name).finish(),
        }
    }
}

impl Assertion {
    pub fn has_action(name: impl Into<String>) -> Self {
        Assertion::HasAction(name.into())
    }

    pub fn has_stage(name: impl Into<String>) -> Self {
        Assertion::HasStage(name.into())
    }

    /// Custom assertion from a synchronous closure.
    pub fn custom<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Log]) -> Result<(), String> + Send + Sync + 'static,
    {
        Assertion::Custom {
            name: name.into(),
            predicate: predicate_fn(f),
        }
    }

    /// Custom assertion from an async closure over an owned copy of the logs.
    pub fn custom_async<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Log>) -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static,
    {
        Assertion::Custom {
            name: name.into(),
            predicate: Arc::new(AsyncPredicate(f)),
        }
    }

    async fn evaluate(
        &self,
        logs: &[Log],
        summary: &EvidenceSummary,
    ) -> Result<(), AssertionFailure> {
        match self {
            Assertion::NoErrors => {
                let errors: Vec<&Log> = logs.iter().filter(|l| l.is_error()).collect();
                if errors.is_empty() {
                    Ok(())
                } else {
                    let mut tags: Vec<String> = errors
                        .iter()
                        .filter_map(|l| l.error.as_ref().map(|e| e.tag.clone()))
                        .collect();
                    tags.sort();
                    tags.dedup();
                    Err(AssertionFailure::NoErrors {
                        count: errors.len(),
                        tags,
                    })
                }
            }
            Assertion::HasAction(expected) => {
                if summary.actions_seen.contains(expected) {
                    Ok(())
                } else {
                    Err(AssertionFailure::MissingAction {
                        expected: expected.clone(),
                        seen: summary.actions_seen.iter().cloned().collect(),
                    })
                }
            }
            Assertion::HasStage(expected) => {
                if summary.stages_seen.contains(expected) {
                    Ok(())
                } else {
                    Err(AssertionFailure::MissingStage {
                        expected: expected.clone(),
                        seen: summary.stages_seen.iter().cloned().collect(),
                    })
                }
            }
            Assertion::Custom { name, predicate } => {
                predicate
                    .check(logs)
                    .await
                    .map_err(|message| AssertionFailure::Custom {
                        name: name.clone(),
                        message,
                    })
            }
        }
    }
}

/// Evaluate every assertion against the final evidence list.
///
/// Zero failures pass, one failure is returned as itself, more are wrapped
/// in [`AssertionFailure::Aggregate`].
pub async fn evaluate_assertions(
    logs: &[Log],
    assertions: &[Assertion],
) -> Result<(), AssertionFailure> {
    let summary = EvidenceSummary::from_logs(logs);
    let mut failures = Vec::new();
    for assertion in assertions {
        if let Err(failure) = assertion.evaluate(logs, &summary).await {
            failures.push(failure);
        }
    }

    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(AssertionFailure::Aggregate(failures)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::LogStatus;
    use futures::FutureExt;

    fn logs() -> Vec<Log> {
        vec![
            Log::new("checkout", "cart.add", LogStatus::Success).with_request_id("r1"),
            Log::new("checkout", "payment", LogStatus::Start)
                .with_error("CardDeclined", "declined"),
        ]
    }

    #[tokio::test]
    async fn test_two_failures_are_aggregated() {
        let result = evaluate_assertions(
            &logs(),
            &[Assertion::NoErrors, Assertion::has_action("x")],
        )
        .await;
        match result {
            Err(failure @ AssertionFailure::Aggregate(_)) => {
                let all = failure.failures();
                assert_eq!(all.len(), 2);
                assert!(matches!(all[0], AssertionFailure::NoErrors { count: 1, .. }));
                assert!(matches!(all[1], AssertionFailure::MissingAction { .. }));
            }
            other => panic!("expected aggregate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_failure_is_not_wrapped() {
        let result = evaluate_assertions(&logs(), &[Assertion::has_stage("shipping")]).await;
        assert_eq!(
            result,
            Err(AssertionFailure::MissingStage {
                expected: "shipping".to_string(),
                seen: vec!["checkout".to_string()],
            })
        );
    }

    #[tokio::test]
    async fn test_error_field_counts_regardless_of_status() {
        let result = evaluate_assertions(&logs(), &[Assertion::NoErrors]).await;
        assert_eq!(
            result,
            Err(AssertionFailure::NoErrors {
                count: 1,
                tags: vec!["CardDeclined".to_string()],
            })
        );
    }

    #[tokio::test]
    async fn test_custom_predicates() {
        let sync = Assertion::custom("has-request", |logs: &[Log]| {
            if logs.iter().any(|l| l.request_id.is_some()) {
                Ok(())
            } else {
                Err("no request id".to_string())
            }
        });
        let suspending = Assertion::custom_async("at-least-three", |logs| {
            async move {
                tokio::task::yield_now().await;
                if logs.len() >= 3 {
                    Ok(())
                } else {
                    Err(format!("only {} logs", logs.len()))
                }
            }
            .boxed()
        });

        let result = evaluate_assertions(&logs(), &[sync, suspending]).await;
        assert_eq!(
            result,
            Err(AssertionFailure::Custom {
                name: "at-least-three".to_string(),
                message: "only 2 logs".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_empty_assertions_pass() {
        assert!(evaluate_assertions(&[], &[]).await.is_ok());
    }
}
