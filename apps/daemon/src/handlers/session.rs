use chunkdrop_ingest_server::{Sender, Session};
use chunkdrop_protocol::MessageType;
use chunkdrop_protocol::envelope::Message;
use chunkdrop_protocol::messages::WelcomeResponse;

use super::{reply, reply_ingest_error};
use crate::convert;
use crate::handler::DaemonHandler;

impl DaemonHandler {
    pub(crate) async fn handle_hello(&self, sender: Sender, session: Session, msg: Message) {
        let quota = match self.coordinator.quota(&session.owner_id).await {
            Ok(q) => q,
            Err(e) => {
                reply_ingest_error(&sender, &msg.id, &e);
                return;
            }
        };

        let welcome = WelcomeResponse {
            owner_id: session.owner_id.to_string(),
            quota: convert::quota_view(quota),
        };
        reply(&sender, &msg, MessageType::Welcome, &welcome);
    }
}
