use chunkdrop_ingest_server::{Sender, Session, encode_binary_message};
use chunkdrop_protocol::MessageType;
use chunkdrop_protocol::envelope::Message;
use chunkdrop_protocol::messages::{
    ARTIFACT_FRAME_TYPE, ArtifactHeader, FileDeletedResponse, FileStatusResponse, FilesResponse,
};

use super::{parse_file_id, reply, reply_ingest_error};
use crate::convert;
use crate::handler::DaemonHandler;

impl DaemonHandler {
    pub(crate) async fn handle_delete_file(&self, sender: Sender, session: Session, msg: Message) {
        let Some(file_id) = parse_file_id(&sender, &msg) else {
            return;
        };

        match self.coordinator.delete_file(&session.owner_id, file_id).await {
            Ok(report) => {
                let resp = FileDeletedResponse {
                    file_id: report.file_id.to_string(),
                    chunks_removed: report.chunks_removed,
                    released_bytes: report.released_bytes,
                    quota: convert::quota_view(report.quota),
                };
                reply(&sender, &msg, MessageType::FileDeleted, &resp);
            }
            Err(e) => reply_ingest_error(&sender, &msg.id, &e),
        }
    }

    pub(crate) async fn handle_file_status(&self, sender: Sender, session: Session, msg: Message) {
        let Some(file_id) = parse_file_id(&sender, &msg) else {
            return;
        };

        match self.coordinator.file_status(&session.owner_id, file_id) {
            Ok(record) => {
                let resp = FileStatusResponse {
                    file: convert::file_summary(&record),
                };
                reply(&sender, &msg, MessageType::FileStatusResponse, &resp);
            }
            Err(e) => reply_ingest_error(&sender, &msg.id, &e),
        }
    }

    pub(crate) async fn handle_list_files(&self, sender: Sender, session: Session, msg: Message) {
        let files = self
            .coordinator
            .list_files(&session.owner_id)
            .iter()
            .map(convert::file_summary)
            .collect();
        reply(&sender, &msg, MessageType::FilesResponse, &FilesResponse { files });
    }

    /// Streams the artifact as binary frames of [`ArtifactHeader`] plus at
    /// most `artifact_frame_bytes` of payload. An empty artifact is one
    /// frame with `is_last` set.
    pub(crate) async fn handle_fetch_artifact(&self, sender: Sender, session: Session, msg: Message) {
        let Some(file_id) = parse_file_id(&sender, &msg) else {
            return;
        };

        let mut artifact = match self.coordinator.fetch_artifact(&session.owner_id, file_id).await {
            Ok(a) => a,
            Err(e) => {
                reply_ingest_error(&sender, &msg.id, &e);
                return;
            }
        };

        let mut offset = 0u64;
        let mut frames = 0usize;
        loop {
            let piece = match artifact.next_piece(self.artifact_frame_bytes).await {
                Ok(piece) => piece,
                Err(e) => {
                    // Frames already sent are void once an error follows.
                    reply_ingest_error(&sender, &msg.id, &e);
                    return;
                }
            };
            let end = offset + piece.len() as u64;
            let header = ArtifactHeader {
                id: msg.id.clone(),
                msg_type: ARTIFACT_FRAME_TYPE.into(),
                file_id: artifact.file_id.to_string(),
                file_name: artifact.name.clone(),
                file_type: artifact.media_type.clone(),
                size: artifact.size,
                offset,
                is_last: piece.len() < self.artifact_frame_bytes || end >= artifact.size,
            };
            let is_last = header.is_last;
            let frame = match encode_binary_message(&header, &piece) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("failed to encode artifact header: {e}");
                    let _ = sender.send_error(&msg, 500, "failed to encode artifact");
                    return;
                }
            };
            if sender.send_binary(frame).await.is_err() {
                tracing::debug!(%file_id, offset, "client gone during artifact transfer");
                return;
            }
            frames += 1;
            offset = end;
            if is_last {
                break;
            }
        }
        tracing::debug!(%file_id, size = offset, frames, "artifact sent");
    }
}
