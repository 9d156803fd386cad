use chunkdrop_store::{FileRecord, validate_file_name};
use serde::{Deserialize, Serialize};

use crate::{IngestError, checksum_bytes};

/// One chunk as received from a client.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSubmission {
    pub file_name: String,
    pub declared_size: u64,
    pub total_chunks: u32,
    /// 0-based position in the file.
    pub sequence_number: u32,
    /// Caller's assertion that this chunk is the final one.
    pub is_last: bool,
    pub media_type: String,
    pub folder_id: Option<String>,
    /// Hex SHA-256 of `payload`, verified when present.
    pub checksum: Option<String>,
    pub payload: Vec<u8>,
}

impl ChunkSubmission {
    /// Checks everything that can be checked without touching storage.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.total_chunks == 0 {
            return Err(IngestError::InvalidChunk("total_chunks must be > 0".into()));
        }
        if self.sequence_number >= self.total_chunks {
            return Err(IngestError::InvalidChunk(format!(
                "sequence_number {} out of range for {} chunks",
                self.sequence_number, self.total_chunks
            )));
        }
        if self.payload.is_empty() {
            return Err(IngestError::InvalidChunk("empty payload".into()));
        }
        validate_file_name(&self.file_name)?;

        if let Some(expected) = &self.checksum {
            if !checksum_bytes(&self.payload).eq_ignore_ascii_case(expected) {
                return Err(IngestError::ChecksumMismatch(self.sequence_number));
            }
        }
        Ok(())
    }

    /// Checks the submission against the file's existing record.
    pub(crate) fn check_against(&self, record: &FileRecord) -> Result<(), IngestError> {
        if record.declared_size != self.declared_size {
            return Err(IngestError::MetadataMismatch(format!(
                "declared size {} != {}",
                self.declared_size, record.declared_size
            )));
        }
        if record.declared_chunk_count != self.total_chunks {
            return Err(IngestError::MetadataMismatch(format!(
                "total chunks {} != {}",
                self.total_chunks, record.declared_chunk_count
            )));
        }
        if record.media_type != self.media_type {
            return Err(IngestError::MetadataMismatch(format!(
                "media type {:?} != {:?}",
                self.media_type, record.media_type
            )));
        }
        Ok(())
    }

    /// Whether this chunk claims to finish `record`.
    pub(crate) fn asserts_completion(&self, record: &FileRecord) -> bool {
        self.is_last && self.sequence_number == record.last_sequence()
    }
}

/// How the coordinator decides that a file is complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Complete when the chunk flagged as last carries the last sequence
    /// number. Earlier chunks may still be in flight.
    #[default]
    CallerAsserted,
    /// Complete when every sequence number `0..total_chunks` is stored.
    /// The last-chunk flag is ignored.
    ServerCounted,
}

/// Result of a successful submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Chunk stored; the file is still open.
    Accepted,
    /// Chunk stored and the file is complete.
    Completed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkdrop_store::{FileId, OwnerId};

    fn record_for(sub: &ChunkSubmission) -> FileRecord {
        FileRecord {
            id: FileId::new(),
            owner_id: OwnerId::new("alice"),
            declared_name: sub.file_name.clone(),
            declared_size: sub.declared_size,
            declared_chunk_count: sub.total_chunks,
            media_type: sub.media_type.clone(),
            folder_id: None,
            is_complete: false,
            created_at: chrono::Utc::now(),
            completed_at: None,
            reassembly: None,
        }
    }

    fn submission(seq: u32, total: u32, payload: &[u8]) -> ChunkSubmission {
        ChunkSubmission {
            file_name: "report.pdf".into(),
            declared_size: 300,
            total_chunks: total,
            sequence_number: seq,
            is_last: seq + 1 == total,
            media_type: "application/pdf".into(),
            folder_id: None,
            checksum: None,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn valid_submission_passes() {
        assert!(submission(0, 3, b"abc").validate().is_ok());
    }

    #[test]
    fn zero_total_chunks_rejected() {
        let err = submission(0, 0, b"abc").validate().unwrap_err();
        assert!(matches!(err, IngestError::InvalidChunk(_)));
    }

    #[test]
    fn sequence_out_of_range_rejected() {
        let err = submission(3, 3, b"abc").validate().unwrap_err();
        assert!(matches!(err, IngestError::InvalidChunk(_)));
    }

    #[test]
    fn empty_payload_rejected() {
        let err = submission(0, 3, b"").validate().unwrap_err();
        assert!(matches!(err, IngestError::InvalidChunk(_)));
    }

    #[test]
    fn unsafe_name_rejected() {
        let mut sub = submission(0, 3, b"abc");
        sub.file_name = "../etc/passwd".into();
        let err = sub.validate().unwrap_err();
        assert!(matches!(err, IngestError::Store(_)));
        assert_eq!(err.kind(), chunkdrop_store::ErrorKind::Validation);
    }

    #[test]
    fn checksum_is_verified() {
        let mut sub = submission(1, 3, b"abc");
        sub.checksum = Some(checksum_bytes(b"abc").to_uppercase());
        assert!(sub.validate().is_ok());

        sub.checksum = Some(checksum_bytes(b"abd"));
        assert!(matches!(
            sub.validate().unwrap_err(),
            IngestError::ChecksumMismatch(1)
        ));
    }

    #[test]
    fn completion_assertion_needs_flag_and_last_sequence() {
        let rec = record_for(&submission(0, 3, b"x"));
        assert!(submission(2, 3, b"x").asserts_completion(&rec));
        assert!(!submission(1, 3, b"x").asserts_completion(&rec));

        let mut early = submission(1, 3, b"x");
        early.is_last = true;
        assert!(!early.asserts_completion(&rec));

        let mut unflagged = submission(2, 3, b"x");
        unflagged.is_last = false;
        assert!(!unflagged.asserts_completion(&rec));
    }

    #[test]
    fn existing_record_metadata_must_match() {
        let first = submission(0, 3, b"abc");
        let rec = record_for(&first);
        assert!(submission(1, 3, b"def").check_against(&rec).is_ok());

        let mut other_size = submission(1, 3, b"def");
        other_size.declared_size = 301;
        assert!(matches!(
            other_size.check_against(&rec),
            Err(IngestError::MetadataMismatch(_))
        ));

        let mut other_type = submission(1, 3, b"def");
        other_type.media_type = "text/plain".into();
        let err = other_type.check_against(&rec).unwrap_err();
        assert!(err.to_string().contains("media type"));
        assert_eq!(err.kind(), chunkdrop_store::ErrorKind::Validation);
    }
}
