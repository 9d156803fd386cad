//! Client connection management: hello gate, read/write pumps, ping/pong,
//! send buffering.

use std::sync::{Arc, OnceLock};

use chunkdrop_protocol::MessageType;
use chunkdrop_protocol::constants::{
    HELLO_TIMEOUT, WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_NOT_IMPLEMENTED,
    WS_ERR_CODE_UNAUTHORIZED, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD, WS_PONG_WAIT,
};
use chunkdrop_protocol::envelope::Message;
use chunkdrop_protocol::messages::HelloRequest;
use chunkdrop_store::OwnerId;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::auth::Authenticator;
use crate::binary::parse_chunk_frame;
use crate::handler::Handler;

type WsError = tokio_tungstenite::tungstenite::Error;

/// Transport-level facts about a connection.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub conn_id: u64,
    pub remote_addr: String,
}

/// An authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub conn_id: u64,
    pub owner_id: OwnerId,
    pub remote_addr: String,
}

/// Handle for sending messages to one client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` if the buffer is full or the client disconnected.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an error response for the given request message.
    pub fn send_error(&self, req: &Message, code: i32, message: &str) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, message))
    }

    /// Sends a raw binary frame, waiting for room in the buffer.
    ///
    /// Fails only once the connection is closed.
    pub async fn send_binary(&self, data: Vec<u8>) -> Result<(), SendError> {
        self.tx
            .send(WsMessage::Binary(data.into()))
            .await
            .map_err(|_| SendError)
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Live client connection.
///
/// Owns the read/write pump tasks and provides a [`Sender`] for
/// asynchronous message delivery.
pub struct Connection {
    pub meta: ConnectionMeta,
    sender: Sender,
    session: Arc<OnceLock<Session>>,
    cancel: CancellationToken,
    pub(crate) closed: CancellationToken,
}

impl Connection {
    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Returns the session once the client has authenticated.
    pub fn session(&self) -> Option<&Session> {
        self.session.get()
    }

    /// Signals the pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the read pump and `on_disconnected` have finished.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

/// Runs the hello gate and then the read and write pumps for a WebSocket
/// connection.
///
/// The pumps run as background tokio tasks and stop when the connection
/// is closed or the cancel token is triggered.
pub(crate) fn spawn_connection<S, H>(
    ws_stream: S,
    meta: ConnectionMeta,
    handler: Arc<H>,
    authenticator: Arc<dyn Authenticator>,
    server_cancel: CancellationToken,
) -> Connection
where
    S: futures_util::Stream<Item = Result<WsMessage, WsError>>
        + futures_util::Sink<WsMessage, Error = WsError>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let closed = CancellationToken::new();
    let sender = Sender { tx };
    let session = Arc::new(OnceLock::new());

    let conn = Connection {
        meta: meta.clone(),
        sender: sender.clone(),
        session: Arc::clone(&session),
        cancel: cancel.clone(),
        closed: closed.clone(),
    };

    let (ws_sink, mut ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    tokio::spawn(async move {
        let authed = tokio::select! {
            _ = cancel.cancelled() => None,
            authed = handshake(&mut ws_stream, &sender, authenticator.as_ref(), &meta) => authed,
        };

        if let Some((new_session, hello)) = authed {
            let _ = session.set(new_session.clone());
            tracing::info!(
                conn_id = meta.conn_id,
                owner = %new_session.owner_id,
                remote_addr = %meta.remote_addr,
                "client authenticated"
            );
            handler
                .on_authenticated(sender.clone(), new_session.clone(), hello)
                .await;
            read_pump(ws_stream, sender, Arc::clone(&handler), new_session.clone(), cancel.clone()).await;
            cancel.cancel();
            handler.on_disconnected(new_session).await;
        } else {
            // Let the write pump flush the rejection before closing.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            cancel.cancel();
        }

        tracing::info!(conn_id = meta.conn_id, remote_addr = %meta.remote_addr, "client disconnected");
        closed.cancel();
    });

    conn
}

/// Waits for the `hello` envelope and authenticates it.
///
/// Returns `None` (after telling the client why, where possible) on
/// timeout, a non-hello first message, or a rejected token.
async fn handshake<S>(
    stream: &mut S,
    sender: &Sender,
    authenticator: &dyn Authenticator,
    meta: &ConnectionMeta,
) -> Option<(Session, Message)>
where
    S: futures_util::Stream<Item = Result<WsMessage, WsError>> + Send + Unpin,
{
    let deadline = tokio::time::sleep(HELLO_TIMEOUT);
    tokio::pin!(deadline);

    let text = loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::warn!(conn_id = meta.conn_id, "hello timeout");
                let _ = sender.send_msg(Message::error("", WS_ERR_CODE_UNAUTHORIZED, "hello timeout"));
                return None;
            }
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => break text,
                Some(Ok(WsMessage::Ping(data))) => {
                    let _ = sender.tx.try_send(WsMessage::Pong(data));
                }
                Some(Ok(WsMessage::Pong(_))) | Some(Ok(WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Binary(_))) => {
                    let _ = sender.send_msg(Message::error("", WS_ERR_CODE_UNAUTHORIZED, "hello required"));
                    return None;
                }
                Some(Ok(WsMessage::Close(_))) | None => return None,
                Some(Err(e)) => {
                    tracing::error!(conn_id = meta.conn_id, "read error during hello: {e}");
                    return None;
                }
            }
        }
    };

    let msg: Message = match serde_json::from_str(&text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(conn_id = meta.conn_id, "invalid hello JSON: {e}");
            let _ = sender.send_msg(Message::error("", WS_ERR_CODE_BAD_REQUEST, "invalid message JSON"));
            return None;
        }
    };
    if msg.msg_type != MessageType::Hello {
        let _ = sender.send_error(&msg, WS_ERR_CODE_UNAUTHORIZED, "hello required");
        return None;
    }
    let token = match msg.payload::<HelloRequest>() {
        Ok(req) => req.token,
        Err(e) => {
            let _ = sender.send_error(&msg, e.code(), &e.to_string());
            return None;
        }
    };

    match authenticator.authenticate(&token).await {
        Some(owner_id) => Some((
            Session {
                conn_id: meta.conn_id,
                owner_id,
                remote_addr: meta.remote_addr.clone(),
            },
            msg,
        )),
        None => {
            tracing::warn!(conn_id = meta.conn_id, remote_addr = %meta.remote_addr, "rejected token");
            let _ = sender.send_error(&msg, WS_ERR_CODE_UNAUTHORIZED, "invalid token");
            None
        }
    }
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = WsError> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    // Best-effort close frame.
    let _ = sink.close().await;
}

/// Read pump: reads WS frames and dispatches to the handler.
async fn read_pump<S, H>(
    mut stream: S,
    sender: Sender,
    handler: Arc<H>,
    session: Session,
    cancel: CancellationToken,
) where
    S: futures_util::Stream<Item = Result<WsMessage, WsError>> + Send + Unpin,
    H: Handler,
{
    let mut pong_deadline = tokio::time::interval(WS_PONG_WAIT);
    pong_deadline.reset();
    let mut got_pong = true;

    loop {
        // Frames first: a slow handler must not turn a buffered pong
        // into a timeout.
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(ws_msg)) => {
                        match ws_msg {
                            WsMessage::Text(text) => {
                                if text.len() > WS_MAX_MESSAGE_SIZE {
                                    tracing::error!("message exceeds max size ({} > {})", text.len(), WS_MAX_MESSAGE_SIZE);
                                    continue;
                                }
                                dispatch_text(&handler, &sender, &session, &text).await;
                            }
                            WsMessage::Binary(data) => {
                                if data.len() > WS_MAX_MESSAGE_SIZE {
                                    tracing::error!("binary message exceeds max size ({} > {})", data.len(), WS_MAX_MESSAGE_SIZE);
                                    continue;
                                }
                                dispatch_binary(&handler, &sender, &session, &data).await;
                            }
                            WsMessage::Pong(_) => {
                                got_pong = true;
                                pong_deadline.reset();
                            }
                            WsMessage::Ping(data) => {
                                let _ = sender.tx.try_send(WsMessage::Pong(data));
                            }
                            WsMessage::Close(_) => {
                                tracing::info!(conn_id = session.conn_id, "received close frame");
                                break;
                            }
                            WsMessage::Frame(_) => {}
                        }
                    }
                    Some(Err(e)) => {
                        tracing::error!(conn_id = session.conn_id, "read pump error: {e}");
                        break;
                    }
                    None => break,
                }
            }

            _ = pong_deadline.tick() => {
                if !got_pong {
                    tracing::warn!(conn_id = session.conn_id, "pong timeout, closing connection");
                    break;
                }
                got_pong = false;
            }
        }
    }
}

/// Dispatches a text (JSON) message to the appropriate handler method.
async fn dispatch_text<H: Handler>(handler: &Arc<H>, sender: &Sender, session: &Session, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("invalid message JSON: {e}");
            let _ = sender.send_msg(Message::error("", WS_ERR_CODE_BAD_REQUEST, "invalid message JSON"));
            return;
        }
    };

    let s = sender.clone();
    let sess = session.clone();
    match msg.msg_type {
        MessageType::Ping => handler.on_ping(s, sess, msg).await,
        MessageType::SubmitChunk => handler.on_submit_chunk(s, sess, msg).await,
        MessageType::DeleteFile => handler.on_delete_file(s, sess, msg).await,
        MessageType::FileStatus => handler.on_file_status(s, sess, msg).await,
        MessageType::ListFiles => handler.on_list_files(s, sess, msg).await,
        MessageType::FetchArtifact => handler.on_fetch_artifact(s, sess, msg).await,
        MessageType::Hello => {
            let _ = sender.send_error(&msg, WS_ERR_CODE_BAD_REQUEST, "already authenticated");
        }
        _ => {
            tracing::warn!(msg_type = ?msg.msg_type, "unhandled message type");
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "unknown message type");
        }
    }
}

/// Dispatches a binary WebSocket frame to the handler.
async fn dispatch_binary<H: Handler>(handler: &Arc<H>, sender: &Sender, session: &Session, data: &[u8]) {
    match parse_chunk_frame(data) {
        Ok((header, payload)) => {
            handler
                .on_binary_chunk(sender.clone(), session.clone(), header, payload)
                .await;
        }
        Err(e) => {
            tracing::error!("failed to parse binary message: {e}");
            let _ = sender.send_msg(Message::error("", WS_ERR_CODE_BAD_REQUEST, e.to_string()));
        }
    }
}
