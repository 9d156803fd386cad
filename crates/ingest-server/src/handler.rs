//! Handler trait for processing WebSocket messages.
//!
//! Implementors provide upload semantics while the server framework
//! handles connection management, authentication, routing, and the
//! binary protocol.

use std::future::Future;
use std::pin::Pin;

use chunkdrop_protocol::MessageType;
use chunkdrop_protocol::constants::WS_ERR_CODE_NOT_IMPLEMENTED;
use chunkdrop_protocol::envelope::Message;
use chunkdrop_protocol::messages::ChunkHeader;

use crate::connection::{Sender, Session};

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling messages from an authenticated client.
///
/// Every method receives:
/// - `sender`: channel to send responses/events back to the client
/// - `session`: the authenticated owner of this connection
/// - `msg`: the parsed JSON envelope (for text) or chunk frame
///
/// Default implementations reply with "not implemented" so handlers only
/// need to override the message types they care about.
pub trait Handler: Send + Sync + 'static {
    /// Called once the `hello` handshake succeeded. The handler should
    /// reply with `welcome`.
    fn on_authenticated(&self, sender: Sender, session: Session, msg: Message) -> HandlerFuture<'_>;

    /// Called for `ping` messages.
    fn on_ping(&self, sender: Sender, _session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_msg(Message::bare(msg.id, MessageType::Pong));
        })
    }

    /// Called for `submit_chunk` (JSON, base64 payload).
    fn on_submit_chunk(&self, sender: Sender, _session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for a binary chunk frame.
    fn on_binary_chunk(
        &self,
        sender: Sender,
        _session: Session,
        header: ChunkHeader,
        _data: Vec<u8>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            tracing::warn!(file_name = %header.file_name, "binary chunk received but handler not implemented");
            let _ = sender.send_msg(Message::error(
                header.id,
                WS_ERR_CODE_NOT_IMPLEMENTED,
                "not implemented",
            ));
        })
    }

    /// Called for `delete_file`.
    fn on_delete_file(&self, sender: Sender, _session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `file_status`.
    fn on_file_status(&self, sender: Sender, _session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `list_files`.
    fn on_list_files(&self, sender: Sender, _session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `fetch_artifact`.
    fn on_fetch_artifact(&self, sender: Sender, _session: Session, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called after an authenticated connection closed.
    fn on_disconnected(&self, _session: Session) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}
