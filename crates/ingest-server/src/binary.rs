//! Binary message protocol: 4-byte big-endian header length + JSON header + raw payload.

use chunkdrop_protocol::messages::ChunkHeader;
use serde::Serialize;

/// Parses a raw binary WebSocket frame into a chunk header and payload.
///
/// Wire format: `[4 bytes: header_len (big-endian)][header_len bytes: JSON][rest: payload]`
pub fn parse_chunk_frame(data: &[u8]) -> Result<(ChunkHeader, Vec<u8>), ParseError> {
    if data.len() < 4 {
        return Err(ParseError::TooShort);
    }

    let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let rest = &data[4..];
    if rest.len() < header_len {
        return Err(ParseError::HeaderTruncated {
            expected: header_len,
            got: rest.len(),
        });
    }

    let (header_bytes, payload) = rest.split_at(header_len);
    let header: ChunkHeader =
        serde_json::from_slice(header_bytes).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    Ok((header, payload.to_vec()))
}

/// Encodes a binary message for sending over WebSocket.
pub fn encode_binary_message<T: Serialize>(
    header: &T,
    payload: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = header_json.len() as u32;

    let mut buf = Vec::with_capacity(4 + header_json.len() + payload.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Errors from binary message parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("message too short (need at least 4 bytes)")]
    TooShort,

    #[error("header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid header JSON: {0}")]
    InvalidJson(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkdrop_protocol::messages::{ARTIFACT_FRAME_TYPE, ArtifactHeader};

    fn make_binary_frame(header: &[u8], payload: &[u8]) -> Vec<u8> {
        let len = header.len() as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(header);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn parse_chunk_message() {
        let header = serde_json::to_vec(&serde_json::json!({
            "id": "msg-1",
            "fileName": "report.pdf",
            "totalFileSize": 300,
            "sequenceNumber": 1,
            "totalChunks": 3,
            "isComplete": false,
            "fileType": "application/pdf",
            "checksum": "abc123"
        }))
        .unwrap();
        let payload = b"binary data here";

        let frame = make_binary_frame(&header, payload);
        let (header, data) = parse_chunk_frame(&frame).unwrap();
        assert_eq!(header.id, "msg-1");
        assert_eq!(header.file_name, "report.pdf");
        assert_eq!(header.total_file_size, 300);
        assert_eq!(header.sequence_number, 1);
        assert_eq!(header.total_chunks, 3);
        assert!(!header.is_complete);
        assert_eq!(header.checksum, "abc123");
        assert_eq!(data, payload);
    }

    #[test]
    fn parse_too_short() {
        let result = parse_chunk_frame(&[0, 0, 0]);
        assert!(matches!(result, Err(ParseError::TooShort)));
    }

    #[test]
    fn parse_header_truncated() {
        // Header says 100 bytes but only has 5.
        let data = [0, 0, 0, 100, 1, 2, 3, 4, 5];
        let result = parse_chunk_frame(&data);
        assert!(matches!(
            result,
            Err(ParseError::HeaderTruncated {
                expected: 100,
                got: 5
            })
        ));
    }

    #[test]
    fn parse_invalid_json() {
        let frame = make_binary_frame(b"not json", b"payload");
        let result = parse_chunk_frame(&frame);
        assert!(matches!(result, Err(ParseError::InvalidJson(_))));
    }

    #[test]
    fn parse_missing_required_field() {
        let header = serde_json::to_vec(&serde_json::json!({"id": "x"})).unwrap();
        let frame = make_binary_frame(&header, b"p");
        assert!(matches!(
            parse_chunk_frame(&frame),
            Err(ParseError::InvalidJson(_))
        ));
    }

    #[test]
    fn encode_then_parse_chunk() {
        let header = ChunkHeader {
            id: "r-1".into(),
            file_name: "test.bin".into(),
            total_file_size: 14,
            sequence_number: 0,
            total_chunks: 1,
            is_complete: true,
            file_type: "application/octet-stream".into(),
            folder_id: Some("docs".into()),
            checksum: String::new(),
        };
        let encoded = encode_binary_message(&header, b"roundtrip data").unwrap();
        let (parsed, data) = parse_chunk_frame(&encoded).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(data, b"roundtrip data");
    }

    #[test]
    fn artifact_frame_layout() {
        let header = ArtifactHeader {
            id: "req-9".into(),
            msg_type: ARTIFACT_FRAME_TYPE.into(),
            file_id: "f-1".into(),
            file_name: "a.txt".into(),
            file_type: "text/plain".into(),
            size: 10,
            offset: 7,
            is_last: true,
        };
        let frame = encode_binary_message(&header, b"abc").unwrap();
        let header_len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let json: serde_json::Value = serde_json::from_slice(&frame[4..4 + header_len]).unwrap();
        assert_eq!(json["type"], "artifact");
        assert_eq!(json["fileName"], "a.txt");
        assert_eq!(json["offset"], 7);
        assert_eq!(&frame[4 + header_len..], b"abc");
    }
}
