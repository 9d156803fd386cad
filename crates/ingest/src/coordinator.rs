use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use chunkdrop_reassembly::Dispatcher;
use chunkdrop_store::{
    ArtifactStore, ChunkStore, FileId, FileLocks, FileRecord, FileRegistry, NewFile, OwnerId,
    QuotaAccountant, QuotaState, StoreError,
};
use tokio::io::AsyncReadExt;

use crate::{
    AnyFolder, ChunkSubmission, CompletionPolicy, FolderDirectory, IngestError, SubmitOutcome,
};

/// Result of [`IngestCoordinator::submit_chunk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub file_id: FileId,
    pub outcome: SubmitOutcome,
}

/// Result of [`IngestCoordinator::delete_file`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionReport {
    pub file_id: FileId,
    pub chunks_removed: usize,
    pub artifact_removed: bool,
    /// Bytes given back to the owner's quota (0 for incomplete files).
    pub released_bytes: u64,
    pub quota: QuotaState,
}

/// A reconstructed file opened for its owner.
///
/// Read it piece by piece with [`next_piece`](Self::next_piece) or whole
/// with [`read_all`](Self::read_all).
#[derive(Debug)]
pub struct Artifact {
    pub file_id: FileId,
    pub name: String,
    pub media_type: String,
    /// Size on disk when opened.
    pub size: u64,
    file: tokio::fs::File,
}

impl Artifact {
    /// Reads up to `max` bytes. Returns an empty buffer at end of file.
    pub async fn next_piece(&mut self, max: usize) -> Result<Vec<u8>, IngestError> {
        let mut piece = Vec::with_capacity(max.min(self.size as usize));
        (&mut self.file)
            .take(max as u64)
            .read_to_end(&mut piece)
            .await
            .map_err(StoreError::from)?;
        Ok(piece)
    }

    /// Reads the remaining bytes.
    pub async fn read_all(mut self) -> Result<Vec<u8>, IngestError> {
        let mut bytes = Vec::with_capacity(self.size as usize);
        self.file
            .read_to_end(&mut bytes)
            .await
            .map_err(StoreError::from)?;
        Ok(bytes)
    }
}

/// Receives chunks and owns every file lifecycle transition.
///
/// Every chunk is checked against its record under the per-file lock
/// once stored, and completion and deletion run under that same lock.
/// A racing submission or delete therefore observes all of the other's
/// effects or none, and a chunk stored for a file deleted meanwhile is
/// removed again and reported as not found.
pub struct IngestCoordinator {
    chunks: Arc<dyn ChunkStore>,
    registry: Arc<FileRegistry>,
    quota: Arc<QuotaAccountant>,
    artifacts: ArtifactStore,
    dispatcher: Arc<Dispatcher>,
    folders: Arc<dyn FolderDirectory>,
    policy: CompletionPolicy,
    locks: FileLocks,
}

impl IngestCoordinator {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        registry: Arc<FileRegistry>,
        quota: Arc<QuotaAccountant>,
        artifacts: ArtifactStore,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            chunks,
            registry,
            quota,
            artifacts,
            dispatcher,
            folders: Arc::new(AnyFolder),
            policy: CompletionPolicy::default(),
            locks: FileLocks::new(),
        }
    }

    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_folders(mut self, folders: Arc<dyn FolderDirectory>) -> Self {
        self.folders = folders;
        self
    }

    /// Stores one chunk and completes the file when the policy says so.
    ///
    /// Safe to retry with the same submission after any error: chunk
    /// writes are idempotent and completion side effects happen once.
    pub async fn submit_chunk(
        &self,
        owner_id: &OwnerId,
        submission: ChunkSubmission,
    ) -> Result<SubmitReceipt, IngestError> {
        submission.validate()?;

        let folder_id = self.resolve_folder(owner_id, submission.folder_id.as_deref()).await;
        let (record, created) = self
            .registry
            .get_or_create(NewFile {
                owner_id: owner_id.clone(),
                declared_name: submission.file_name.clone(),
                declared_size: submission.declared_size,
                declared_chunk_count: submission.total_chunks,
                media_type: submission.media_type.clone(),
                folder_id,
            })
            .await?;
        if !created {
            submission.check_against(&record)?;
        }

        let file_id = record.id;
        let sequence_number = submission.sequence_number;
        self.chunks
            .put(file_id, sequence_number, &submission.payload)
            .await?;

        let _guard = self.locks.lock(&file_id).await;
        let Some(record) = self.registry.get(file_id) else {
            // Deleted or reaped while the chunk was being written.
            let removed = self.chunks.delete_all(file_id).await?;
            tracing::warn!(%file_id, sequence_number, removed, "file removed during chunk write, chunk discarded");
            return Err(IngestError::FileNotFound(file_id));
        };
        tracing::debug!(
            %file_id,
            sequence_number,
            total_chunks = record.declared_chunk_count,
            bytes = submission.payload.len(),
            "chunk stored"
        );

        let complete = match self.policy {
            CompletionPolicy::CallerAsserted => submission.asserts_completion(&record),
            CompletionPolicy::ServerCounted => {
                let stored = self.chunks.sequences(file_id).await?;
                stored.len() as u32 >= record.declared_chunk_count
            }
        };
        if !complete {
            return Ok(SubmitReceipt {
                file_id,
                outcome: SubmitOutcome::Accepted,
            });
        }

        self.complete_locked(&record).await?;
        Ok(SubmitReceipt {
            file_id,
            outcome: SubmitOutcome::Completed,
        })
    }

    async fn resolve_folder(&self, owner_id: &OwnerId, folder_id: Option<&str>) -> Option<String> {
        let folder_id = folder_id.filter(|f| !f.is_empty())?;
        if self.folders.folder_exists(owner_id, folder_id).await {
            Some(folder_id.to_string())
        } else {
            tracing::warn!(owner = %owner_id, folder_id, "unknown folder, storing upload without folder");
            None
        }
    }

    /// Completion transition: mark complete, reserve quota, dispatch.
    /// A no-op if the file is already complete. The caller holds the
    /// file's lock.
    async fn complete_locked(&self, record: &FileRecord) -> Result<(), IngestError> {
        let file_id = record.id;
        if record.is_complete {
            tracing::debug!(%file_id, "completion repeated, nothing to do");
            return Ok(());
        }

        self.registry.mark_complete(file_id).await?;

        // Used space is recomputed from complete records at startup, which
        // covers a reservation lost here.
        let used_space = match self
            .quota
            .reserve_on_completion(&record.owner_id, record.declared_size)
            .await
        {
            Ok(change) => Some(change.after.used_space),
            Err(e) => {
                tracing::error!(%file_id, owner = %record.owner_id, error = %e, "failed to reserve quota");
                None
            }
        };

        tracing::info!(
            %file_id,
            owner = %record.owner_id,
            name = %record.declared_name,
            size = record.declared_size,
            used_space = ?used_space,
            "upload complete"
        );

        // Startup recovery re-enqueues complete files that never got an
        // outcome, so a failed enqueue is not fatal here.
        if let Err(e) = self.dispatcher.enqueue(file_id) {
            tracing::error!(%file_id, error = %e, "failed to dispatch reassembly");
        }
        Ok(())
    }

    /// Deletes a file with its chunks and artifact, and releases its
    /// quota if it was complete.
    pub async fn delete_file(
        &self,
        owner_id: &OwnerId,
        file_id: FileId,
    ) -> Result<DeletionReport, IngestError> {
        let _guard = self.locks.lock(&file_id).await;
        let record = self.owned_record(owner_id, file_id)?;

        let chunks_removed = self.chunks.delete_all(file_id).await?;
        let artifact_removed = self.artifacts.remove(&record).await?;
        self.registry.remove(file_id).await?;

        let (released_bytes, quota) = if record.is_complete {
            let change = self
                .quota
                .release_on_deletion(owner_id, record.declared_size)
                .await?;
            (record.declared_size, change.after)
        } else {
            (0, self.quota.snapshot(owner_id).await?)
        };

        tracing::info!(
            %file_id,
            owner = %owner_id,
            chunks_removed,
            artifact_removed,
            released_bytes,
            "file deleted"
        );
        Ok(DeletionReport {
            file_id,
            chunks_removed,
            artifact_removed,
            released_bytes,
            quota,
        })
    }

    /// Returns the owner's record for `file_id`.
    pub fn file_status(&self, owner_id: &OwnerId, file_id: FileId) -> Result<FileRecord, IngestError> {
        self.owned_record(owner_id, file_id)
    }

    /// Returns the owner's files, oldest first.
    pub fn list_files(&self, owner_id: &OwnerId) -> Vec<FileRecord> {
        self.registry.list_for_owner(owner_id)
    }

    /// Returns the owner's current quota.
    pub async fn quota(&self, owner_id: &OwnerId) -> Result<QuotaState, IngestError> {
        Ok(self.quota.snapshot(owner_id).await?)
    }

    /// Opens the reconstructed file. Only available once the latest
    /// reconstruction succeeded.
    pub async fn fetch_artifact(
        &self,
        owner_id: &OwnerId,
        file_id: FileId,
    ) -> Result<Artifact, IngestError> {
        let record = self.owned_record(owner_id, file_id)?;
        if !record.has_artifact() {
            return Err(IngestError::ArtifactNotReady(file_id));
        }
        let (file, size) = self.artifacts.open(&record).await?;
        Ok(Artifact {
            file_id,
            name: record.declared_name,
            media_type: record.media_type,
            size,
            file,
        })
    }

    /// Deletes incomplete uploads idle for more than `ttl`: created and
    /// last written to before the cutoff. Returns how many were removed.
    pub async fn reap_stale(&self, ttl: Duration) -> Result<usize, IngestError> {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return Ok(0);
        };

        let mut reaped = 0;
        for candidate in self.registry.all() {
            if candidate.is_complete || candidate.created_at >= cutoff {
                continue;
            }
            let _guard = self.locks.lock(&candidate.id).await;
            // Re-check: the last chunk may have landed meanwhile.
            match self.registry.get(candidate.id) {
                Some(record) if !record.is_complete => {}
                _ => continue,
            }
            if let Some(last_write) = self.chunks.last_write(candidate.id).await? {
                if last_write >= cutoff {
                    continue;
                }
            }
            let chunks_removed = self.chunks.delete_all(candidate.id).await?;
            self.registry.remove(candidate.id).await?;
            tracing::info!(
                file_id = %candidate.id,
                owner = %candidate.owner_id,
                chunks_removed,
                "reaped stale upload"
            );
            reaped += 1;
        }
        Ok(reaped)
    }

    /// Recomputes every owner's used space as the sum of their complete
    /// files' declared sizes. Run at startup, before accepting chunks.
    /// Returns how many accounts were corrected.
    pub async fn reconcile_quota(&self) -> Result<usize, IngestError> {
        let mut used: BTreeMap<OwnerId, u64> = self
            .quota
            .known_owners()
            .await?
            .into_iter()
            .map(|owner| (owner, 0))
            .collect();
        for record in self.registry.all() {
            if record.is_complete {
                let total = used.entry(record.owner_id).or_default();
                *total = total.saturating_add(record.declared_size);
            }
        }

        let mut corrected = 0;
        for (owner_id, used_space) in used {
            if self.quota.reconcile(&owner_id, used_space).await?.is_some() {
                corrected += 1;
            }
        }
        Ok(corrected)
    }

    fn owned_record(&self, owner_id: &OwnerId, file_id: FileId) -> Result<FileRecord, IngestError> {
        self.registry
            .get(file_id)
            .filter(|r| &r.owner_id == owner_id)
            .ok_or(IngestError::FileNotFound(file_id))
    }
}
