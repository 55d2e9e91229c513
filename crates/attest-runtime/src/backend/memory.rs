//! Backend replaying a fixed list of events.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use attest_core::{Log, ObservabilityError};

use super::{Backend, EvidenceStream};

/// Replays recorded events, optionally keeping the stream open afterwards.
///
/// Useful for declarative gates over captured evidence and for tests.
#[derive(Debug, Clone)]
pub struct StaticBackend {
    name: String,
    logs: Vec<Log>,
    hold_open: bool,
    start_error: Option<String>,
    stream_error: Option<String>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl StaticBackend {
    pub fn new(name: impl Into<String>, logs: Vec<Log>) -> Self {
        Self {
            name: name.into(),
            logs,
            hold_open: false,
            start_error: None,
            stream_error: None,
            starts: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Keep the stream pending after the last event instead of ending it.
    pub fn hold_open(mut self, hold_open: bool) -> Self {
        self.hold_open = hold_open;
        self
    }

    /// Make `start` fail with `message`.
    pub fn failing_start(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    /// Yield a stream error after the recorded events.
    pub fn with_stream_error(mut self, message: impl Into<String>) -> Self {
        self.stream_error = Some(message.into());
        self
    }

    /// Counter of `start` calls, shared with clones.
    pub fn start_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.starts)
    }

    /// Counter of `stop` calls, shared with clones.
    pub fn stop_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.stops)
    }
}

#[async_trait]
impl Backend for StaticBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<EvidenceStream, ObservabilityError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.start_error {
            return Err(ObservabilityError::new(&self.name, message.clone()));
        }

        let events = futures::stream::iter(self.logs.clone().into_iter().map(Ok));
        let tail = futures::stream::iter(
            self.stream_error
                .clone()
                .map(|message| Err(ObservabilityError::new(&self.name, message))),
        );
        let stream = events.chain(tail);
        if self.hold_open {
            Ok(stream.chain(futures::stream::pending()).boxed())
        } else {
            Ok(stream.boxed())
        }
    }

    async fn stop(&mut self) -> Result<(), ObservabilityError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::LogStatus;

    #[tokio::test]
    async fn test_replays_then_ends() {
        let mut backend = StaticBackend::new(
            "replay",
            vec![Log::new("s", "a", LogStatus::Success)],
        );
        let items: Vec<_> = backend.start().await.unwrap().collect().await;
        assert_eq!(items.len(), 1);
        backend.stop().await.unwrap();
        assert_eq!(backend.stop_count().load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_error_follows_events() {
        let mut backend = StaticBackend::new("replay", vec![]).with_stream_error("reset");
        let items: Vec<_> = backend.start().await.unwrap().collect().await;
        assert!(matches!(items.as_slice(), [Err(e)] if e.message == "reset"));
    }

    #[tokio::test]
    async fn test_failing_start() {
        let mut backend = StaticBackend::new("replay", vec![]).failing_start("no socket");
        assert!(backend.start().await.is_err());
        assert_eq!(backend.start_count().load(Ordering::SeqCst), 1);
    }
}
