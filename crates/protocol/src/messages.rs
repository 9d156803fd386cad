use serde::{Deserialize, Serialize};

use crate::types::{FileSummary, QuotaView, ReassemblyState, SubmitOutcome};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// First message on every connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub token: String,
}

/// Chunk metadata, shared by binary frames and the JSON fallback.
///
/// Field names follow the multipart form the upload endpoint has always
/// accepted (`file_name`, `total_file_size`, ...), camel-cased.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    /// Request id, echoed in the [`ChunkAck`].
    pub id: String,
    pub file_name: String,
    pub total_file_size: u64,
    pub sequence_number: u32,
    pub total_chunks: u32,
    /// Caller's assertion that this is the final chunk.
    pub is_complete: bool,
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// Hex SHA-256 of the payload (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Sends a chunk as JSON.
///
/// The `data` field is base64-encoded. Binary frames are preferred; this
/// exists for clients that cannot send binary WebSocket messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitChunkRequest {
    #[serde(flatten)]
    pub header: ChunkHeader,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// Targets one file by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRequest {
    pub file_id: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Reply to a successful [`HelloRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeResponse {
    pub owner_id: String,
    pub quota: QuotaView,
}

/// Acknowledges a stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub file_id: String,
    pub sequence_number: u32,
    pub outcome: SubmitOutcome,
    pub bytes_written: u64,
}

/// Reply to `delete_file`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDeletedResponse {
    pub file_id: String,
    pub chunks_removed: usize,
    pub released_bytes: u64,
    pub quota: QuotaView,
}

/// Reply to `file_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatusResponse {
    pub file: FileSummary,
}

/// Reply to `list_files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilesResponse {
    pub files: Vec<FileSummary>,
}

/// Header of one binary frame answering `fetch_artifact`.
///
/// The artifact arrives as consecutive frames sharing the request id.
/// `offset` is where this frame's payload starts in the file and the
/// frame with `is_last` set ends the transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactHeader {
    /// Id of the `fetch_artifact` request.
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub file_id: String,
    pub file_name: String,
    pub file_type: String,
    /// Size of the whole artifact.
    pub size: u64,
    pub offset: u64,
    pub is_last: bool,
}

/// Binary header type tag for artifact frames.
pub const ARTIFACT_FRAME_TYPE: &str = "artifact";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Pushed to the owner when a reconstruction attempt finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassemblyEvent {
    pub file_id: String,
    pub file_name: String,
    pub state: ReassemblyState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> ChunkHeader {
        ChunkHeader {
            id: "c-1".into(),
            file_name: "report.pdf".into(),
            total_file_size: 300,
            sequence_number: 2,
            total_chunks: 3,
            is_complete: true,
            file_type: "application/pdf".into(),
            folder_id: None,
            checksum: String::new(),
        }
    }

    #[test]
    fn submit_chunk_base64_payload() {
        let req = SubmitChunkRequest {
            header: sample_header(),
            data: vec![0x48, 0x65, 0x6c, 0x6c, 0x6f],
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"data\":\"SGVsbG8=\""));
        // Header fields are flattened next to the data.
        assert!(json.contains("\"fileName\":\"report.pdf\""));

        let parsed: SubmitChunkRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.data, b"Hello");
        assert_eq!(parsed.header.sequence_number, 2);
    }

    #[test]
    fn submit_chunk_rejects_bad_base64() {
        let json = r#"{"id":"x","fileName":"a","totalFileSize":1,"sequenceNumber":0,
            "totalChunks":1,"isComplete":true,"fileType":"text/plain","data":"%%%"}"#;
        assert!(serde_json::from_str::<SubmitChunkRequest>(json).is_err());
    }

    #[test]
    fn chunk_header_optional_fields() {
        let json = r#"{"id":"x","fileName":"a.txt","totalFileSize":5,"sequenceNumber":0,
            "totalChunks":1,"isComplete":true,"fileType":"text/plain"}"#;
        let header: ChunkHeader = serde_json::from_str(json).unwrap();
        assert!(header.folder_id.is_none());
        assert!(header.checksum.is_empty());

        let out = serde_json::to_string(&header).unwrap();
        assert!(!out.contains("folderId"));
        assert!(!out.contains("checksum"));
    }

    #[test]
    fn artifact_header_type_field() {
        let header = ArtifactHeader {
            id: "r-1".into(),
            msg_type: ARTIFACT_FRAME_TYPE.into(),
            file_id: "f-1".into(),
            file_name: "a.bin".into(),
            file_type: "application/octet-stream".into(),
            size: 3,
            offset: 0,
            is_last: true,
        };
        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains("\"type\":\"artifact\""));
        assert!(json.contains("\"isLast\":true"));
    }
}
