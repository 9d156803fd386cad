use chunkdrop_store::FileRegistry;

use crate::{Dispatcher, ReassemblyError};

/// Re-enqueues complete files that never got a reconstruction outcome.
///
/// Covers a crash between enqueue and the final attempt, a pending
/// retry included: the in-process queue does not survive a restart, the
/// records do. Returns how many jobs were enqueued.
pub fn recover_pending(
    registry: &FileRegistry,
    dispatcher: &Dispatcher,
) -> Result<usize, ReassemblyError> {
    let mut recovered = 0;
    for record in registry.all() {
        if record.is_complete && record.reassembly.is_none() {
            dispatcher.enqueue(record.id)?;
            recovered += 1;
        }
    }
    if recovered > 0 {
        tracing::info!(recovered, "re-enqueued pending reassembly jobs");
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InProcessQueue, JobQueue};
    use chunkdrop_store::{NewFile, OwnerId, ReconstructionResult};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn new_file(name: &str) -> NewFile {
        NewFile {
            owner_id: OwnerId::new("alice"),
            declared_name: name.into(),
            declared_size: 1,
            declared_chunk_count: 1,
            media_type: "text/plain".into(),
            folder_id: None,
        }
    }

    #[tokio::test]
    async fn only_complete_files_without_outcome_are_recovered() {
        let dir = TempDir::new().unwrap();
        let registry = FileRegistry::open(dir.path()).await.unwrap();

        let (open, _) = registry.get_or_create(new_file("open")).await.unwrap();
        let (pending, _) = registry.get_or_create(new_file("pending")).await.unwrap();
        registry.mark_complete(pending.id).await.unwrap();
        let (done, _) = registry.get_or_create(new_file("done")).await.unwrap();
        registry.mark_complete(done.id).await.unwrap();
        registry
            .record_reassembly(ReconstructionResult::failed(done.id, 3, "gave up"))
            .await
            .unwrap();

        let queue = Arc::new(InProcessQueue::new());
        let dispatcher = Dispatcher::new(queue.clone());
        assert_eq!(recover_pending(&registry, &dispatcher).unwrap(), 1);

        let job = queue.consume().await.unwrap();
        assert_eq!(job.file_id, pending.id);
        assert_ne!(job.file_id, open.id);
        assert_eq!(dispatcher.dispatched(), 1);
    }
}
