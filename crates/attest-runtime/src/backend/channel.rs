//! In-process backend fed through a bounded buffer.
//!
//! Exec actions write their output lines here, and embedding code can push
//! events through a [`LogBuffer`] handle. When the buffer is full the oldest
//! event is dropped and counted.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

use attest_core::{Log, ObservabilityError};

use super::{Backend, EvidenceSink, EvidenceStream, LogSink};

struct Shared {
    queue: Mutex<VecDeque<Log>>,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

/// Cloneable producer handle for a [`ChannelBackend`].
#[derive(Clone)]
pub struct LogBuffer {
    shared: Arc<Shared>,
}

impl LogBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Events dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Events waiting to be read.
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl EvidenceSink for LogBuffer {
    fn emit(&self, log: Log) {
        if self.is_closed() {
            return;
        }
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(log);
        }
        self.shared.notify.notify_one();
    }
}

/// Backend whose events come from inside the process.
pub struct ChannelBackend {
    name: String,
    buffer: LogBuffer,
    started: bool,
}

impl ChannelBackend {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            buffer: LogBuffer::new(capacity),
            started: false,
        }
    }

    /// Producer handle; events pushed before `start` are kept.
    pub fn buffer(&self) -> LogBuffer {
        self.buffer.clone()
    }
}

#[async_trait]
impl Backend for ChannelBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<EvidenceStream, ObservabilityError> {
        if self.started {
            return Err(ObservabilityError::new(&self.name, "backend already started"));
        }
        self.started = true;
        debug!(backend = %self.name, "Channel backend started");

        let shared = Arc::clone(&self.buffer.shared);
        let stream = futures::stream::unfold(shared, |shared| async move {
            loop {
                let next = shared.queue.lock().pop_front();
                if let Some(log) = next {
                    return Some((Ok::<_, ObservabilityError>(log), shared));
                }
                if shared.closed.load(Ordering::Acquire) {
                    return None;
                }
                shared.notify.notified().await;
            }
        });
        Ok(stream.boxed())
    }

    async fn stop(&mut self) -> Result<(), ObservabilityError> {
        self.buffer.close();
        let dropped = self.buffer.dropped();
        if dropped > 0 {
            warn!(
                backend = %self.name,
                dropped,
                capacity = self.buffer.shared.capacity,
                "Evidence buffer overflowed; oldest events were dropped"
            );
        }
        Ok(())
    }

    fn sink(&self) -> Option<LogSink> {
        Some(Arc::new(self.buffer.clone()))
    }
}
