//! WebSocket transport for chunkdrop.
//!
//! Accepts any number of client connections, gates each one behind a
//! `hello` handshake resolved by an [`Authenticator`], then dispatches
//! JSON envelopes and binary chunk frames to a [`Handler`]. The server
//! owns connection lifecycle only (ping/pong, size limits, graceful
//! shutdown); all upload semantics live in the handler.

mod auth;
mod binary;
mod connection;
mod handler;
mod server;

pub use auth::{AuthFuture, Authenticator, StaticTokens};
pub use binary::{ParseError, encode_binary_message, parse_chunk_frame};
pub use connection::{Connection, ConnectionMeta, SendError, Sender, Session};
pub use handler::{Handler, HandlerFuture};
pub use server::{IngestServer, ServerConfig};

/// Per-connection send buffer capacity.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Errors produced by the ingest server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection limit reached ({0})")]
    TooManyConnections(usize),
}
