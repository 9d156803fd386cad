//! Ingest WebSocket server.
//!
//! Listens on a TCP port, upgrades connections to WebSocket and keeps a
//! table of live connections so events can be pushed to every session
//! of an owner.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chunkdrop_protocol::constants::WS_MAX_MESSAGE_SIZE;
use chunkdrop_store::OwnerId;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use crate::ServerError;
use crate::auth::Authenticator;
use crate::connection::{self, Connection, ConnectionMeta, Sender};
use crate::handler::Handler;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// Connections beyond this are dropped before the upgrade.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            max_connections: 1024,
        }
    }
}

/// The ingest WebSocket server.
pub struct IngestServer<H: Handler> {
    config: ServerConfig,
    handler: Arc<H>,
    authenticator: Arc<dyn Authenticator>,
    connections: Mutex<HashMap<u64, Connection>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl<H: Handler> IngestServer<H> {
    /// Creates a new server with the given handler and token resolver.
    pub fn new(config: ServerConfig, handler: H, authenticator: Arc<dyn Authenticator>) -> Arc<Self> {
        Arc::new(Self {
            config,
            handler: Arc::new(handler),
            authenticator,
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
        })
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Number of open connections, authenticated or not.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Senders for every authenticated connection of `owner`.
    pub async fn senders_for(&self, owner: &OwnerId) -> Vec<Sender> {
        self.connections
            .lock()
            .await
            .values()
            .filter(|c| c.session().is_some_and(|s| &s.owner_id == owner))
            .map(|c| c.sender())
            .collect()
    }

    /// Gracefully shuts down the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the server until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        let addr = SocketAddr::new(self.config.bind_addr, self.config.port);
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("ingest server listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    self.close_all().await;
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::error!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Closes every connection and waits for their teardown.
    async fn close_all(&self) {
        let conns: Vec<Connection> = self.connections.lock().await.drain().map(|(_, c)| c).collect();
        for conn in &conns {
            conn.close();
        }
        for conn in &conns {
            conn.closed().await;
        }
    }

    /// Upgrades one TCP stream and tracks the connection until it closes.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let limit = self.config.max_connections;
        if self.connection_count().await >= limit {
            tracing::warn!(%peer_addr, limit, "rejecting connection: limit reached");
            return Err(ServerError::TooManyConnections(limit));
        }

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let ws_stream = accept_async_with_config(stream, Some(ws_config)).await?;
        tracing::info!(%peer_addr, "WebSocket connection established");

        let meta = ConnectionMeta {
            conn_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            remote_addr: peer_addr.to_string(),
        };
        let conn_id = meta.conn_id;

        let conn = connection::spawn_connection(
            ws_stream,
            meta,
            Arc::clone(&self.handler),
            Arc::clone(&self.authenticator),
            self.cancel.clone(),
        );
        let closed = conn.closed.clone();
        self.connections.lock().await.insert(conn_id, conn);

        closed.cancelled().await;
        self.connections.lock().await.remove(&conn_id);
        Ok(())
    }
}
