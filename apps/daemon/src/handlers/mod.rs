mod files;
mod session;
mod upload;

use chunkdrop_ingest::IngestError;
use chunkdrop_ingest_server::Sender;
use chunkdrop_protocol::MessageType;
use chunkdrop_protocol::envelope::Message;
use chunkdrop_protocol::messages::FileRequest;
use chunkdrop_store::FileId;
use serde::Serialize;

use crate::convert;

/// Sends `payload` as the `msg_type` reply to `msg`.
fn reply<T: Serialize>(sender: &Sender, msg: &Message, msg_type: MessageType, payload: &T) {
    match msg.reply(msg_type, payload) {
        Ok(reply) => {
            let _ = sender.send_msg(reply);
        }
        Err(e) => tracing::error!("failed to build reply: {e}"),
    }
}

/// Replies with the error code matching the error's kind.
fn reply_ingest_error(sender: &Sender, id: &str, err: &IngestError) {
    let code = convert::error_code(err.kind());
    if code >= 500 {
        tracing::error!(request = id, error = %err, "request failed");
    } else {
        tracing::debug!(request = id, error = %err, "request rejected");
    }
    let _ = sender.send_msg(Message::error(id, code, err.to_string()));
}

/// Extracts the `fileId` of a [`FileRequest`], replying 400 when absent
/// or malformed.
fn parse_file_id(sender: &Sender, msg: &Message) -> Option<FileId> {
    let req: FileRequest = match msg.payload() {
        Ok(r) => r,
        Err(e) => {
            let _ = sender.send_error(msg, e.code(), &e.to_string());
            return None;
        }
    };
    match req.file_id.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            let _ = sender.send_error(msg, 400, &format!("invalid file id: {}", req.file_id));
            None
        }
    }
}
