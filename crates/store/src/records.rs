use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{FileId, OwnerId};

/// One logical upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub owner_id: OwnerId,
    pub declared_name: String,
    pub declared_size: u64,
    pub declared_chunk_count: u32,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// Monotonic: false until the completing chunk, then true forever.
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Outcome of the latest reconstruction attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reassembly: Option<ReconstructionResult>,
}

impl FileRecord {
    /// File name of the reconstructed artifact: `{id}-{declared_name}`.
    pub fn artifact_file_name(&self) -> String {
        format!("{}-{}", self.id, self.declared_name)
    }

    /// Sequence number the caller must flag as last.
    pub fn last_sequence(&self) -> u32 {
        self.declared_chunk_count.saturating_sub(1)
    }

    /// Returns `true` once a reconstruction succeeded.
    pub fn has_artifact(&self) -> bool {
        self.reassembly
            .as_ref()
            .is_some_and(|r| r.status == ReconstructionStatus::Succeeded)
    }
}

/// Parameters for creating a [`FileRecord`] on first chunk arrival.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFile {
    pub owner_id: OwnerId,
    pub declared_name: String,
    pub declared_size: u64,
    pub declared_chunk_count: u32,
    pub media_type: String,
    pub folder_id: Option<String>,
}

/// One stored piece of a file's byte stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub file_id: FileId,
    pub sequence_number: u32,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// Per-owner space accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaState {
    pub used_space: u64,
    pub max_space: u64,
}

impl QuotaState {
    pub fn is_over(&self) -> bool {
        self.used_space > self.max_space
    }
}

/// Terminal status of one reconstruction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionStatus {
    Succeeded,
    Failed,
}

/// Outcome of one reconstruction attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionResult {
    pub file_id: FileId,
    pub status: ReconstructionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub attempt: u32,
    pub finished_at: DateTime<Utc>,
}

impl ReconstructionResult {
    pub fn succeeded(file_id: FileId, attempt: u32, path: PathBuf, size: u64, sha256: String) -> Self {
        Self {
            file_id,
            status: ReconstructionStatus::Succeeded,
            error_detail: None,
            artifact_path: Some(path),
            size: Some(size),
            sha256: Some(sha256),
            attempt,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(file_id: FileId, attempt: u32, error: impl Into<String>) -> Self {
        Self {
            file_id,
            status: ReconstructionStatus::Failed,
            error_detail: Some(error.into()),
            artifact_path: None,
            size: None,
            sha256: None,
            attempt,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReconstructionStatus::Succeeded
    }
}
