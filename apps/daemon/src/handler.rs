//! Handler implementation for the ingest WS server.
//!
//! `DaemonHandler` implements the `ingest_server::Handler` trait and
//! forwards every request to the [`IngestCoordinator`] on behalf of the
//! session's owner.

use std::sync::Arc;

use chunkdrop_ingest::IngestCoordinator;
use chunkdrop_ingest_server::{Handler, HandlerFuture, Sender, Session};
use chunkdrop_protocol::envelope::Message;
use chunkdrop_protocol::messages::ChunkHeader;

pub struct DaemonHandler {
    pub coordinator: Arc<IngestCoordinator>,
    /// Largest payload of one artifact frame.
    pub artifact_frame_bytes: usize,
}

impl DaemonHandler {
    pub fn new(coordinator: Arc<IngestCoordinator>, artifact_frame_bytes: usize) -> Self {
        Self {
            coordinator,
            artifact_frame_bytes: artifact_frame_bytes.max(1),
        }
    }
}

impl Handler for DaemonHandler {
    fn on_authenticated(&self, sender: Sender, session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move { self.handle_hello(sender, session, msg).await })
    }

    // -----------------------------------------------------------------------
    // Uploads
    // -----------------------------------------------------------------------

    fn on_submit_chunk(&self, sender: Sender, session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move { self.handle_submit_chunk(sender, session, msg).await })
    }

    fn on_binary_chunk(
        &self,
        sender: Sender,
        session: Session,
        header: ChunkHeader,
        data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move { self.store_chunk(&sender, &session, header, data).await })
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    fn on_delete_file(&self, sender: Sender, session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move { self.handle_delete_file(sender, session, msg).await })
    }

    fn on_file_status(&self, sender: Sender, session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move { self.handle_file_status(sender, session, msg).await })
    }

    fn on_list_files(&self, sender: Sender, session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move { self.handle_list_files(sender, session, msg).await })
    }

    fn on_fetch_artifact(&self, sender: Sender, session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move { self.handle_fetch_artifact(sender, session, msg).await })
    }

    fn on_disconnected(&self, session: Session) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::debug!(conn_id = session.conn_id, owner = %session.owner_id, "session ended");
        })
    }
}
