use chunkdrop_ingest_server::{Sender, Session};
use chunkdrop_protocol::MessageType;
use chunkdrop_protocol::envelope::Message;
use chunkdrop_protocol::messages::{ChunkAck, ChunkHeader, SubmitChunkRequest};

use super::reply_ingest_error;
use crate::convert;
use crate::handler::DaemonHandler;

impl DaemonHandler {
    pub(crate) async fn handle_submit_chunk(&self, sender: Sender, session: Session, msg: Message) {
        let req: SubmitChunkRequest = match msg.payload() {
            Ok(r) => r,
            Err(e) => {
                let _ = sender.send_error(&msg, e.code(), &e.to_string());
                return;
            }
        };

        // The ack carries the envelope id, not whatever the header says.
        let mut header = req.header;
        header.id = msg.id;
        self.store_chunk(&sender, &session, header, req.data).await;
    }

    /// Stores one chunk and acks it under the header's request id.
    pub(crate) async fn store_chunk(
        &self,
        sender: &Sender,
        session: &Session,
        header: ChunkHeader,
        data: Vec<u8>,
    ) {
        let request_id = header.id.clone();
        let sequence_number = header.sequence_number;
        let bytes_written = data.len() as u64;

        let submission = convert::chunk_submission(header, data);
        let receipt = match self.coordinator.submit_chunk(&session.owner_id, submission).await {
            Ok(r) => r,
            Err(e) => {
                reply_ingest_error(sender, &request_id, &e);
                return;
            }
        };

        let ack = ChunkAck {
            file_id: receipt.file_id.to_string(),
            sequence_number,
            outcome: convert::submit_outcome(receipt.outcome),
            bytes_written,
        };
        match Message::with_payload(request_id, MessageType::ChunkAck, &ack) {
            Ok(reply) => {
                let _ = sender.send_msg(reply);
            }
            Err(e) => tracing::error!("failed to build chunk ack: {e}"),
        }
    }
}
