//! Chunk ingestion and file lifecycle.
//!
//! [`IngestCoordinator`] is the single entry point transports call: it
//! accepts chunks, decides when a file is complete, accounts quota,
//! dispatches reconstruction, and serves deletion, status, listing and
//! artifact retrieval.

mod checksum;
mod coordinator;
mod folders;
mod submission;

pub use checksum::checksum_bytes;
pub use coordinator::{Artifact, DeletionReport, IngestCoordinator, SubmitReceipt};
pub use folders::{AnyFolder, FolderDirectory, FolderFuture, StaticFolders};
pub use submission::{ChunkSubmission, CompletionPolicy, SubmitOutcome};

use chunkdrop_reassembly::ReassemblyError;
use chunkdrop_store::{ErrorKind, FileId, StoreError};

/// Errors produced by the ingest crate.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Dispatch(#[from] ReassemblyError),

    #[error("invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("checksum mismatch for chunk {0}")]
    ChecksumMismatch(u32),

    #[error("chunk does not match existing file: {0}")]
    MetadataMismatch(String),

    #[error("file not found: {0}")]
    FileNotFound(FileId),

    #[error("artifact not available for file {0}")]
    ArtifactNotReady(FileId),
}

impl IngestError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Store(e) => e.kind(),
            IngestError::Dispatch(e) => e.kind(),
            IngestError::InvalidChunk(_)
            | IngestError::ChecksumMismatch(_)
            | IngestError::MetadataMismatch(_) => ErrorKind::Validation,
            IngestError::FileNotFound(_) | IngestError::ArtifactNotReady(_) => {
                ErrorKind::NotFound
            }
        }
    }
}
