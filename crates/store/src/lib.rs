//! Durable state for chunked uploads.
//!
//! Everything lives under a single data directory:
//!
//! ```text
//! {data_dir}/files/{file_id}.json               one FileRecord per upload
//! {data_dir}/chunks/{file_id}/{seq:010}.chunk   raw chunk payloads
//! {data_dir}/quota/{hex(owner_id)}.json         per-owner space accounting
//! {artifact_dir}/{file_id}-{declared_name}      reconstructed files
//! ```
//!
//! Every write goes through a temp file + rename so a crash never leaves
//! a half-written record or chunk behind.

mod artifacts;
mod chunks;
mod fsutil;
mod ids;
mod locks;
mod quota;
mod records;
mod registry;
mod validation;

pub use artifacts::{ArtifactStore, StagedArtifact};
pub use chunks::{ChunkStore, ChunkStream, FsChunkStore, StoreFuture};
pub use ids::{FileId, OwnerId};
pub use locks::{FileLocks, KeyedLocks, OwnerLocks};
pub use quota::{DEFAULT_MAX_SPACE, QuotaAccountant, QuotaChange};
pub use records::{
    ChunkRecord, FileRecord, NewFile, QuotaState, ReconstructionResult, ReconstructionStatus,
};
pub use registry::FileRegistry;
pub use validation::validate_file_name;

/// Broad error classes shared by every chunkdrop crate.
///
/// Transport layers map these to status codes; the reassembly worker
/// uses them to decide whether a failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range request data. Nothing was mutated.
    Validation,
    /// The referenced file or owner does not exist.
    NotFound,
    /// A policy limit (quota) is exceeded. Reported, never blocking.
    Conflict,
    /// Stored chunks do not form a complete, gap-free sequence.
    Integrity,
    /// I/O failure against the backing store. Safe to retry.
    TransientStorage,
}

impl ErrorKind {
    /// Returns `true` for failures a caller may simply retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientStorage)
    }
}

/// Errors produced by the store crate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("file not found: {0}")]
    FileNotFound(FileId),

    #[error("invalid file name: {0}")]
    InvalidName(String),
}

impl StoreError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Io(_) | StoreError::Json(_) => ErrorKind::TransientStorage,
            StoreError::FileNotFound(_) => ErrorKind::NotFound,
            StoreError::InvalidName(_) => ErrorKind::Validation,
        }
    }
}
