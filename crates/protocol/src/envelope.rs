use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::{MessageType, WS_ERR_CODE_BAD_REQUEST};

/// Error details carried by an `error` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsError {
    pub code: i32,
    pub message: String,
}

/// JSON envelope shared by requests, replies and pushed events.
///
/// A reply reuses the request's `id`. Events pushed by the server get a
/// fresh id. The payload stays raw until the receiver knows its type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WsError>,
}

/// Why a request payload could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("missing payload")]
    Missing,

    #[error("invalid payload: {0}")]
    Invalid(#[from] serde_json::Error),
}

impl PayloadError {
    /// Error code to answer with.
    pub fn code(&self) -> i32 {
        WS_ERR_CODE_BAD_REQUEST
    }
}

impl Message {
    /// An envelope without payload (`ping`, `pong`, `list_files`).
    pub fn bare(id: impl Into<String>, msg_type: MessageType) -> Self {
        Self {
            id: id.into(),
            msg_type,
            payload: None,
            error: None,
        }
    }

    /// An envelope carrying `payload` serialized as JSON.
    pub fn with_payload<T: Serialize + ?Sized>(
        id: impl Into<String>,
        msg_type: MessageType,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        let raw = serde_json::value::to_raw_value(payload)?;
        Ok(Self {
            payload: Some(raw),
            ..Self::bare(id, msg_type)
        })
    }

    /// An `error` envelope answering request `id`.
    pub fn error(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            error: Some(WsError {
                code,
                message: message.into(),
            }),
            ..Self::bare(id, MessageType::Error)
        }
    }

    /// Decodes the payload a request is required to carry.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        let raw = self.payload.as_deref().ok_or(PayloadError::Missing)?;
        Ok(serde_json::from_str(raw.get())?)
    }

    /// Reply of type `msg_type` to this request.
    pub fn reply<T: Serialize + ?Sized>(
        &self,
        msg_type: MessageType,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Self::with_payload(self.id.as_str(), msg_type, payload)
    }

    /// Error reply to this request.
    pub fn reply_error(&self, code: i32, message: impl Into<String>) -> Self {
        Self::error(self.id.as_str(), code, message)
    }

    /// Error code of an `error` envelope.
    pub fn error_code(&self) -> Option<i32> {
        self.error.as_ref().map(|e| e.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{FileRequest, WelcomeResponse};
    use crate::types::QuotaView;

    #[test]
    fn file_request_payload_decodes() {
        let raw = r#"{"id":"s-1","type":"file_status","payload":{"fileId":"f-1"}}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.msg_type, MessageType::FileStatus);
        let req: FileRequest = msg.payload().unwrap();
        assert_eq!(req.file_id, "f-1");
    }

    #[test]
    fn missing_payload_is_a_bad_request() {
        let msg: Message = serde_json::from_str(r#"{"id":"c-1","type":"submit_chunk"}"#).unwrap();
        let err = msg.payload::<FileRequest>().unwrap_err();
        assert!(matches!(err, PayloadError::Missing));
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn wrong_payload_shape_is_invalid() {
        let raw = r#"{"id":"d-1","type":"delete_file","payload":{"fileId":7}}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        let err = msg.payload::<FileRequest>().unwrap_err();
        assert!(matches!(err, PayloadError::Invalid(_)));
        assert!(err.to_string().starts_with("invalid payload"));
    }

    #[test]
    fn welcome_reply_keeps_hello_id() {
        let hello: Message =
            serde_json::from_str(r#"{"id":"hello-1","type":"hello","payload":{"token":"t"}}"#)
                .unwrap();
        let welcome = WelcomeResponse {
            owner_id: "alice".into(),
            quota: QuotaView {
                used_space: 10,
                max_space: 100,
            },
        };
        let reply = hello.reply(MessageType::Welcome, &welcome).unwrap();
        assert_eq!(reply.id, "hello-1");
        assert_eq!(reply.payload::<WelcomeResponse>().unwrap(), welcome);
    }

    #[test]
    fn error_reply_carries_code() {
        let req = Message::bare("d-9", MessageType::DeleteFile);
        let reply = req.reply_error(404, "file not found");
        assert_eq!(reply.id, "d-9");
        assert_eq!(reply.msg_type, MessageType::Error);
        assert_eq!(reply.error_code(), Some(404));
        assert_eq!(req.error_code(), None);
    }

    #[test]
    fn bare_envelope_serializes_without_optionals() {
        let json = serde_json::to_string(&Message::bare("p-1", MessageType::Pong)).unwrap();
        assert_eq!(json, r#"{"id":"p-1","type":"pong"}"#);
    }
}
