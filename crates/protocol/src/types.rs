use serde::{Deserialize, Serialize};

/// Result of submitting one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitOutcome {
    /// Chunk stored; the file is still waiting for more chunks.
    #[serde(rename = "accepted")]
    Accepted,
    /// Chunk stored and the file transitioned (or already was) complete.
    #[serde(rename = "completed")]
    Completed,
}

/// State of a file's reconstruction as seen by clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReassemblyState {
    /// Upload still in progress, nothing to reconstruct yet.
    #[serde(rename = "uploading")]
    Uploading,
    /// Complete and queued (or running).
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "succeeded")]
    Succeeded,
    #[serde(rename = "failed")]
    Failed,
}

/// Reconstruction details attached to a [`FileSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassemblyView {
    pub state: ReassemblyState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_size: Option<u64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

/// Public view of one uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file_id: String,
    pub file_name: String,
    pub size: u64,
    pub total_chunks: u32,
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    pub is_complete: bool,
    pub created_at: String,
    pub reassembly: ReassemblyView,
}

/// Owner space accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaView {
    pub used_space: u64,
    pub max_space: u64,
}
