use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chunkdrop_store::FileId;

use crate::{JobQueue, ReassemblyError, ReassemblyJob};

/// Hands completed files to the job queue.
///
/// Deduplication is the caller's job: the ingest coordinator only calls
/// [`enqueue`](Self::enqueue) on the transition to complete.
pub struct Dispatcher {
    queue: Arc<dyn JobQueue>,
    dispatched: AtomicU64,
}

impl Dispatcher {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            dispatched: AtomicU64::new(0),
        }
    }

    /// Enqueues the first reconstruction attempt for `file_id`.
    pub fn enqueue(&self, file_id: FileId) -> Result<ReassemblyJob, ReassemblyError> {
        let job = ReassemblyJob::new(file_id);
        self.enqueue_job(job.clone())?;
        Ok(job)
    }

    /// Enqueues an already-built job (used for retries).
    pub fn enqueue_job(&self, job: ReassemblyJob) -> Result<(), ReassemblyError> {
        let task_id = job.task_id;
        let file_id = job.file_id;
        let attempt = job.attempt;
        self.queue.enqueue(job)?;
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(%file_id, %task_id, attempt, "reassembly job enqueued");
        Ok(())
    }

    /// Number of jobs handed to the queue so far, retries included.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}
