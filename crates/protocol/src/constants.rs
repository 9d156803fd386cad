use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for a pong response (or any incoming message).
///
/// Acts as a read deadline: if nothing arrives within this window the
/// connection is considered dead. Large chunk writes on a slow disk can
/// stall the client for a while, so this is generous.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often the server pings each client.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(15);

/// Maximum message size in bytes (64 MB).
///
/// Bounds a single chunk frame, header included.
pub const WS_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Recommended chunk size for clients (4 MiB). Also the default
/// payload size of one artifact frame.
pub const RECOMMENDED_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Timeout for the `hello` handshake after the socket opens.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Connection management
    #[serde(rename = "hello")]
    Hello,
    #[serde(rename = "welcome")]
    Welcome,
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,

    // Requests from client to server
    #[serde(rename = "submit_chunk")]
    SubmitChunk,
    #[serde(rename = "delete_file")]
    DeleteFile,
    #[serde(rename = "file_status")]
    FileStatus,
    #[serde(rename = "list_files")]
    ListFiles,
    #[serde(rename = "fetch_artifact")]
    FetchArtifact,

    // Responses from server to client
    #[serde(rename = "chunk_ack")]
    ChunkAck,
    #[serde(rename = "file_deleted")]
    FileDeleted,
    #[serde(rename = "file_status_response")]
    FileStatusResponse,
    #[serde(rename = "files_response")]
    FilesResponse,
    #[serde(rename = "error")]
    Error,

    // Events from server to client (push notifications)
    #[serde(rename = "reassembly_event")]
    ReassemblyEvent,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Common WebSocket error codes.
pub const WS_ERR_CODE_BAD_REQUEST: i32 = 400;
pub const WS_ERR_CODE_UNAUTHORIZED: i32 = 401;
pub const WS_ERR_CODE_NOT_FOUND: i32 = 404;
pub const WS_ERR_CODE_CONFLICT: i32 = 409;
pub const WS_ERR_CODE_UNPROCESSABLE: i32 = 422;
pub const WS_ERR_CODE_INTERNAL: i32 = 500;
pub const WS_ERR_CODE_NOT_IMPLEMENTED: i32 = 501;
