use std::sync::Arc;
use std::time::Duration;

use chunkdrop_store::{FileRegistry, ReconstructionResult};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Dispatcher, JobQueue, ReassemblyJob, Reassembler};

/// Capacity of the result broadcast channel.
const EVENT_BUFFER: usize = 256;

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub workers: usize,
    /// Total attempts per job, the first one included.
    pub max_attempts: u32,
    /// Delay before retry `n` is `retry_backoff * n`.
    pub retry_backoff: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

struct Shared {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    dispatcher: Arc<Dispatcher>,
    reassembler: Arc<Reassembler>,
    registry: Arc<FileRegistry>,
    events: broadcast::Sender<ReconstructionResult>,
    cancel: CancellationToken,
}

/// Tokio tasks draining the job queue.
///
/// A job's final outcome is written to the file's record and broadcast
/// on the channel behind [`subscribe`](Self::subscribe). A failure that
/// will be retried is only logged, so the record keeps no outcome until
/// the last attempt and recovery still finds it after a restart.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `config.workers` workers (at least one).
    pub fn spawn(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        dispatcher: Arc<Dispatcher>,
        reassembler: Arc<Reassembler>,
        registry: Arc<FileRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let workers = config.workers.max(1);
        let shared = Arc::new(Shared {
            config,
            queue,
            dispatcher,
            reassembler,
            registry,
            events,
            cancel,
        });

        let handles = (0..workers)
            .map(|worker| {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { run_worker(worker, shared).await })
            })
            .collect();

        tracing::info!(workers, "reassembly worker pool started");
        Self { shared, handles }
    }

    /// Receives every final outcome from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ReconstructionResult> {
        self.shared.events.subscribe()
    }

    /// Stops the workers and waits for them. A job in progress finishes
    /// first.
    pub async fn shutdown(self) {
        self.shared.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "reassembly worker panicked");
            }
        }
        tracing::info!("reassembly worker pool stopped");
    }
}

async fn run_worker(worker: usize, shared: Arc<Shared>) {
    tracing::debug!(worker, "reassembly worker started");
    loop {
        let job = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            job = shared.queue.consume() => job,
        };
        let Some(job) = job else {
            tracing::debug!(worker, "job queue closed");
            break;
        };
        process(&shared, job).await;
    }
    tracing::debug!(worker, "reassembly worker stopped");
}

async fn process(shared: &Arc<Shared>, job: ReassemblyJob) {
    let file_id = job.file_id;
    let attempt = job.attempt;
    tracing::debug!(%file_id, task_id = %job.task_id, attempt, "reassembly job started");

    let result = match shared.reassembler.reconstruct(file_id, attempt).await {
        Ok(result) => result,
        Err(e) => {
            if e.kind().is_retryable() && attempt < shared.config.max_attempts {
                tracing::warn!(%file_id, attempt, error = %e, "reassembly failed, will retry");
                schedule_retry(shared, &job);
                return;
            }
            tracing::error!(%file_id, attempt, error = %e, "reassembly failed");
            ReconstructionResult::failed(file_id, attempt, e.to_string())
        }
    };

    record(shared, &result).await;
    let _ = shared.events.send(result);
}

/// Writes the outcome onto the file record. An artifact built for a file
/// deleted in the meantime is removed again.
async fn record(shared: &Shared, result: &ReconstructionResult) {
    match shared.registry.record_reassembly(result.clone()).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::debug!(file_id = %result.file_id, "file deleted during reassembly");
            if let Some(path) = &result.artifact_path {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %path.display(), error = %e, "failed to remove orphaned artifact");
                    }
                }
            }
        }
        Err(e) => {
            tracing::error!(file_id = %result.file_id, error = %e, "failed to record reassembly outcome");
        }
    }
}

fn schedule_retry(shared: &Arc<Shared>, job: &ReassemblyJob) {
    let next = job.next_attempt();
    let delay = shared.config.retry_backoff * job.attempt;
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        tokio::select! {
            _ = shared.cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                if let Err(e) = shared.dispatcher.enqueue_job(next) {
                    tracing::error!(error = %e, "failed to enqueue reassembly retry");
                }
            }
        }
    });
}
