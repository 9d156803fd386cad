//! Mapping between core records and wire types.

use chunkdrop_ingest::{ChunkSubmission, SubmitOutcome};
use chunkdrop_protocol::constants::{
    WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_CONFLICT, WS_ERR_CODE_INTERNAL, WS_ERR_CODE_NOT_FOUND,
    WS_ERR_CODE_UNPROCESSABLE,
};
use chunkdrop_protocol::messages::{ChunkHeader, ReassemblyEvent};
use chunkdrop_protocol::types::{self, FileSummary, QuotaView, ReassemblyState, ReassemblyView};
use chunkdrop_store::{
    ErrorKind, FileRecord, QuotaState, ReconstructionResult, ReconstructionStatus,
};

/// WebSocket error code for an error kind.
pub fn error_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Validation => WS_ERR_CODE_BAD_REQUEST,
        ErrorKind::NotFound => WS_ERR_CODE_NOT_FOUND,
        ErrorKind::Conflict => WS_ERR_CODE_CONFLICT,
        ErrorKind::Integrity => WS_ERR_CODE_UNPROCESSABLE,
        ErrorKind::TransientStorage => WS_ERR_CODE_INTERNAL,
    }
}

pub fn chunk_submission(header: ChunkHeader, payload: Vec<u8>) -> ChunkSubmission {
    ChunkSubmission {
        file_name: header.file_name,
        declared_size: header.total_file_size,
        total_chunks: header.total_chunks,
        sequence_number: header.sequence_number,
        is_last: header.is_complete,
        media_type: header.file_type,
        folder_id: header.folder_id.filter(|f| !f.is_empty()),
        checksum: Some(header.checksum).filter(|c| !c.is_empty()),
        payload,
    }
}

pub fn submit_outcome(outcome: SubmitOutcome) -> types::SubmitOutcome {
    match outcome {
        SubmitOutcome::Accepted => types::SubmitOutcome::Accepted,
        SubmitOutcome::Completed => types::SubmitOutcome::Completed,
    }
}

pub fn quota_view(quota: QuotaState) -> QuotaView {
    QuotaView {
        used_space: quota.used_space,
        max_space: quota.max_space,
    }
}

fn state_of(result: &ReconstructionResult) -> ReassemblyState {
    match result.status {
        ReconstructionStatus::Succeeded => ReassemblyState::Succeeded,
        ReconstructionStatus::Failed => ReassemblyState::Failed,
    }
}

fn reassembly_view(record: &FileRecord) -> ReassemblyView {
    match (&record.reassembly, record.is_complete) {
        (Some(result), _) => ReassemblyView {
            state: state_of(result),
            artifact_size: result.size,
            sha256: result.sha256.clone().unwrap_or_default(),
            error: result.error_detail.clone().unwrap_or_default(),
        },
        (None, complete) => ReassemblyView {
            state: if complete {
                ReassemblyState::Pending
            } else {
                ReassemblyState::Uploading
            },
            artifact_size: None,
            sha256: String::new(),
            error: String::new(),
        },
    }
}

pub fn file_summary(record: &FileRecord) -> FileSummary {
    FileSummary {
        file_id: record.id.to_string(),
        file_name: record.declared_name.clone(),
        size: record.declared_size,
        total_chunks: record.declared_chunk_count,
        file_type: record.media_type.clone(),
        folder_id: record.folder_id.clone(),
        is_complete: record.is_complete,
        created_at: record.created_at.to_rfc3339(),
        reassembly: reassembly_view(record),
    }
}

pub fn reassembly_event(file_name: &str, result: &ReconstructionResult) -> ReassemblyEvent {
    ReassemblyEvent {
        file_id: result.file_id.to_string(),
        file_name: file_name.to_string(),
        state: state_of(result),
        error: result.error_detail.clone().unwrap_or_default(),
    }
}
