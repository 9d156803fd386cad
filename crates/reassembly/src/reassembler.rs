use std::sync::Arc;

use chunkdrop_store::{
    ArtifactStore, ChunkStore, FileId, FileRecord, FileRegistry, ReconstructionResult,
    StagedArtifact,
};
use futures_util::TryStreamExt;
use sha2::{Digest, Sha256};

use crate::ReassemblyError;

/// Rebuilds a completed upload from its stored chunks.
///
/// Safe to run any number of times for the same file: each run writes
/// a fresh staging file and renames it onto the same artifact path, so
/// a failed run never leaves a partial artifact and a successful one
/// replaces the previous artifact with identical bytes.
pub struct Reassembler {
    registry: Arc<FileRegistry>,
    chunks: Arc<dyn ChunkStore>,
    artifacts: ArtifactStore,
}

impl Reassembler {
    pub fn new(
        registry: Arc<FileRegistry>,
        chunks: Arc<dyn ChunkStore>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            registry,
            chunks,
            artifacts,
        }
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Reconstructs `file_id`. Returns a succeeded result; every failure
    /// is an error so the caller can decide whether to retry.
    pub async fn reconstruct(
        &self,
        file_id: FileId,
        attempt: u32,
    ) -> Result<ReconstructionResult, ReassemblyError> {
        let record = self
            .registry
            .get(file_id)
            .ok_or(ReassemblyError::FileNotFound(file_id))?;
        if !record.is_complete {
            return Err(ReassemblyError::NotComplete(file_id));
        }

        // Cheap gap check before touching any payload.
        let sequences = self.chunks.sequences(file_id).await?;
        check_contiguous(&record, &sequences)?;

        let mut staged = self.artifacts.stage(&record).await?;
        let sha256 = match self.copy_chunks(&record, &mut staged).await {
            Ok(digest) => digest,
            Err(e) => {
                staged.discard().await;
                return Err(e);
            }
        };

        let size = staged.written();
        if size != record.declared_size {
            tracing::warn!(
                %file_id,
                declared_size = record.declared_size,
                actual_size = size,
                "reconstructed size differs from declared size"
            );
        }

        let path = staged.commit().await?;
        tracing::info!(%file_id, name = %record.declared_name, size, attempt, "file reconstructed");
        Ok(ReconstructionResult::succeeded(file_id, attempt, path, size, sha256))
    }

    /// Streams chunks into `staged`, re-checking contiguity as it goes
    /// since chunks may change between the pre-check and the read.
    async fn copy_chunks(
        &self,
        record: &FileRecord,
        staged: &mut StagedArtifact,
    ) -> Result<String, ReassemblyError> {
        let expected = record.declared_chunk_count;
        let mut hasher = Sha256::new();
        let mut next: u32 = 0;

        let mut stream = self.chunks.get_ordered(record.id).await?;
        while let Some(chunk) = stream.try_next().await? {
            if chunk.sequence_number >= expected {
                return Err(ReassemblyError::UnexpectedChunk {
                    file_id: record.id,
                    sequence_number: chunk.sequence_number,
                    expected,
                });
            }
            if chunk.sequence_number != next {
                return Err(ReassemblyError::MissingChunks {
                    file_id: record.id,
                    expected,
                    missing: chunk.sequence_number - next,
                    first_missing: next,
                });
            }
            hasher.update(&chunk.payload);
            staged.write(&chunk.payload).await?;
            next += 1;
        }

        if next != expected {
            return Err(ReassemblyError::MissingChunks {
                file_id: record.id,
                expected,
                missing: expected - next,
                first_missing: next,
            });
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Verifies `sequences` (sorted, unique) is exactly `0..declared_chunk_count`.
fn check_contiguous(record: &FileRecord, sequences: &[u32]) -> Result<(), ReassemblyError> {
    let expected = record.declared_chunk_count;
    if let Some(&extra) = sequences.iter().find(|&&s| s >= expected) {
        return Err(ReassemblyError::UnexpectedChunk {
            file_id: record.id,
            sequence_number: extra,
            expected,
        });
    }

    let present = sequences.len() as u32;
    if present == expected {
        return Ok(());
    }
    let first_missing = sequences
        .iter()
        .zip(0u32..)
        .find(|(s, i)| *s != i)
        .map(|(_, i)| i)
        .unwrap_or(present);
    Err(ReassemblyError::MissingChunks {
        file_id: record.id,
        expected,
        missing: expected - present,
        first_missing,
    })
}
