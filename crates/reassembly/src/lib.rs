//! Asynchronous reconstruction of completed uploads.
//!
//! The ingest side hands a completed file to the [`Dispatcher`], which
//! wraps it in a [`ReassemblyJob`] and pushes it onto a [`JobQueue`].
//! A [`WorkerPool`] drains the queue and runs the [`Reassembler`] for
//! each job, retrying transient storage failures.

mod dispatcher;
mod job;
mod queue;
mod reassembler;
mod recovery;
mod worker;

pub use dispatcher::Dispatcher;
pub use job::ReassemblyJob;
pub use queue::{InProcessQueue, JobQueue, QueueFuture};
pub use reassembler::Reassembler;
pub use recovery::recover_pending;
pub use worker::{WorkerConfig, WorkerPool};

use chunkdrop_store::{ErrorKind, FileId, StoreError};

/// Errors produced by the reassembly crate.
#[derive(Debug, thiserror::Error)]
pub enum ReassemblyError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("file not found: {0}")]
    FileNotFound(FileId),

    #[error("file {0} is not complete")]
    NotComplete(FileId),

    #[error("file {file_id}: {missing} of {expected} chunks missing, first gap at {first_missing}")]
    MissingChunks {
        file_id: FileId,
        expected: u32,
        missing: u32,
        first_missing: u32,
    },

    #[error("file {file_id}: unexpected chunk {sequence_number} (declared {expected})")]
    UnexpectedChunk {
        file_id: FileId,
        sequence_number: u32,
        expected: u32,
    },

    #[error("job queue closed")]
    QueueClosed,
}

impl ReassemblyError {
    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReassemblyError::Store(e) => e.kind(),
            ReassemblyError::FileNotFound(_) => ErrorKind::NotFound,
            ReassemblyError::NotComplete(_) => ErrorKind::Validation,
            ReassemblyError::MissingChunks { .. } | ReassemblyError::UnexpectedChunk { .. } => {
                ErrorKind::Integrity
            }
            ReassemblyError::QueueClosed => ErrorKind::TransientStorage,
        }
    }
}
