//! Evidence collection under a dual clock.
//!
//! Two deadlines race: the absolute `max` deadline measured from the start of
//! collection, and the `idle` quiet period measured from the last event (or
//! from the start when nothing has arrived yet). Both are re-evaluated on
//! every event. The absolute deadline always wins a tie.

use futures::StreamExt;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::debug;

use attest_core::{Log, ObservabilityError, StopPolicy};

use crate::backend::EvidenceStream;

/// Collection ended on the absolute deadline or on a stream error.
#[derive(Debug)]
pub struct CollectTimeout {
    pub elapsed: Duration,

    /// Events received before the deadline or error
    pub logs: Vec<Log>,

    /// Set when the stream itself failed
    pub cause: Option<ObservabilityError>,
}

/// Drain `stream` until it goes quiet, ends, reaches `max_logs`, or the
/// absolute deadline passes.
///
/// An idle period with no events at all is a successful, empty collection.
pub async fn collect_evidence(
    stream: &mut EvidenceStream,
    policy: StopPolicy,
    max_logs: Option<usize>,
) -> Result<Vec<Log>, CollectTimeout> {
    let started = Instant::now();
    let max_deadline = started + policy.max();
    let mut idle_deadline = started + policy.idle();
    let mut logs = Vec::new();

    loop {
        let now = Instant::now();
        if now >= max_deadline {
            debug!(collected = logs.len(), "Evidence max deadline reached");
            return Err(CollectTimeout {
                elapsed: now - started,
                logs,
                cause: None,
            });
        }
        if now >= idle_deadline {
            debug!(collected = logs.len(), "Evidence stream went idle");
            return Ok(logs);
        }

        let budget = max_deadline.min(idle_deadline) - now;
        match timeout(budget, stream.next()).await {
            Ok(Some(Ok(log))) => {
                logs.push(log);
                if max_logs.is_some_and(|cap| logs.len() >= cap) {
                    debug!(collected = logs.len(), "Evidence cap reached");
                    return Ok(logs);
                }
                idle_deadline = Instant::now() + policy.idle();
            }
            Ok(Some(Err(cause))) => {
                return Err(CollectTimeout {
                    elapsed: started.elapsed(),
                    logs,
                    cause: Some(cause),
                });
            }
            Ok(None) => {
                debug!(collected = logs.len(), "Evidence stream ended");
                return Ok(logs);
            }
            // The loop head decides which deadline fired.
            Err(_) => {}
        }
    }
}
