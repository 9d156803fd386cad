use std::future::Future;
use std::pin::Pin;

use tokio::sync::{Mutex, mpsc};

use crate::{ReassemblyError, ReassemblyJob};

/// Future returned by [`JobQueue::consume`]. `None` means the queue is
/// closed and drained.
pub type QueueFuture<'a> = Pin<Box<dyn Future<Output = Option<ReassemblyJob>> + Send + 'a>>;

/// Broker-agnostic job queue.
///
/// `enqueue` must never block: it is called from the chunk submission
/// path.
pub trait JobQueue: Send + Sync + 'static {
    fn enqueue(&self, job: ReassemblyJob) -> Result<(), ReassemblyError>;

    /// Waits for the next job. Safe to call from several workers.
    fn consume(&self) -> QueueFuture<'_>;
}

/// Unbounded in-process queue over a tokio channel.
pub struct InProcessQueue {
    tx: mpsc::UnboundedSender<ReassemblyJob>,
    rx: Mutex<mpsc::UnboundedReceiver<ReassemblyJob>>,
}

impl InProcessQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl Default for InProcessQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for InProcessQueue {
    fn enqueue(&self, job: ReassemblyJob) -> Result<(), ReassemblyError> {
        self.tx.send(job).map_err(|_| ReassemblyError::QueueClosed)
    }

    fn consume(&self) -> QueueFuture<'_> {
        Box::pin(async move { self.rx.lock().await.recv().await })
    }
}
