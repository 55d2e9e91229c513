//! Observability backends.
//!
//! A backend is a source of evidence events. It is started once before any
//! action of a gate run and stopped exactly once afterwards, whatever the
//! outcome. Backends are owned by a single run and never shared.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;

use attest_core::{Log, ObservabilityError};

mod channel;
mod memory;

pub use channel::{ChannelBackend, LogBuffer};
pub use memory::StaticBackend;

/// Stream of evidence events produced by a started backend.
pub type EvidenceStream = BoxStream<'static, Result<Log, ObservabilityError>>;

/// Where actions push evidence they produce themselves.
///
/// Backends that observe the local process (exec output) hand one out via
/// [`Backend::sink`]; backends that watch a remote system return `None`.
pub trait EvidenceSink: Send + Sync {
    fn emit(&self, log: Log);
}

/// Shared handle to an [`EvidenceSink`].
pub type LogSink = Arc<dyn EvidenceSink>;

/// A source of evidence for one gate run.
#[async_trait]
pub trait Backend: Send {
    /// Backend name for logs and errors.
    fn name(&self) -> &str;

    /// Begin observing. Called once, before any action runs.
    async fn start(&mut self) -> Result<EvidenceStream, ObservabilityError>;

    /// Release everything acquired by `start`. Called exactly once.
    async fn stop(&mut self) -> Result<(), ObservabilityError>;

    /// Sink that actions may write local evidence into.
    fn sink(&self) -> Option<LogSink> {
        None
    }
}
