//! Application orchestrator: wires storage, reassembly, ingestion and
//! the WebSocket server together.

use std::sync::Arc;
use std::time::Duration;

use chunkdrop_ingest::IngestCoordinator;
use chunkdrop_ingest_server::IngestServer;
use chunkdrop_protocol::MessageType;
use chunkdrop_protocol::envelope::Message;
use chunkdrop_reassembly::{
    Dispatcher, InProcessQueue, JobQueue, Reassembler, WorkerPool, recover_pending,
};
use chunkdrop_store::{
    ArtifactStore, ChunkStore, FileRegistry, FsChunkStore, QuotaAccountant, ReconstructionResult,
};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::convert;
use crate::handler::DaemonHandler;

type Server = IngestServer<DaemonHandler>;

/// A running daemon.
pub struct Daemon {
    server: Arc<Server>,
    pool: WorkerPool,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Daemon {
    /// Opens the stores, recovers pending work and starts every service.
    /// Returns once the server is listening.
    pub async fn start(config: &Config) -> anyhow::Result<Self> {
        let cancel = CancellationToken::new();

        // -- Storage --
        let data_dir = &config.data_dir;
        let chunks: Arc<dyn ChunkStore> = Arc::new(FsChunkStore::new(data_dir.join("chunks")));
        let registry = Arc::new(FileRegistry::open(data_dir.join("files")).await?);
        let quota = Arc::new(
            QuotaAccountant::open(data_dir.join("quota"), config.default_max_space).await?,
        );
        let artifacts = ArtifactStore::new(config.artifact_dir());
        let swept = artifacts.sweep_staging().await?;
        tracing::info!(
            files = registry.len(),
            swept,
            artifact_dir = %artifacts.root().display(),
            "storage opened"
        );

        // -- Reassembly --
        let queue: Arc<dyn JobQueue> = Arc::new(InProcessQueue::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&queue)));
        let reassembler = Arc::new(Reassembler::new(
            Arc::clone(&registry),
            Arc::clone(&chunks),
            artifacts.clone(),
        ));
        let pool = WorkerPool::spawn(
            config.worker_config(),
            queue,
            Arc::clone(&dispatcher),
            reassembler,
            Arc::clone(&registry),
            cancel.child_token(),
        );
        let events = pool.subscribe();
        recover_pending(&registry, &dispatcher)?;

        // -- Ingestion --
        let coordinator = Arc::new(
            IngestCoordinator::new(chunks, Arc::clone(&registry), quota, artifacts, dispatcher)
                .with_policy(config.completion_policy)
                .with_folders(config.folder_directory()),
        );
        let corrected = coordinator.reconcile_quota().await?;
        if corrected > 0 {
            tracing::warn!(corrected, "quota accounts reconciled with stored files");
        }

        // -- WS server --
        let server = IngestServer::new(
            config.server_config(),
            DaemonHandler::new(Arc::clone(&coordinator), config.artifact_frame_bytes),
            Arc::new(config.authenticator()),
        );
        let server_run = Arc::clone(&server);
        let server_task = tokio::spawn(async move {
            if let Err(e) = server_run.run().await {
                tracing::error!("server error: {e}");
            }
        });

        // Wait for the server to bind.
        let port = loop {
            let p = server.port().await;
            if p > 0 {
                break p;
            }
            if server_task.is_finished() {
                pool.shutdown().await;
                anyhow::bail!("server failed to start");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        tracing::info!(port, "WebSocket server listening");

        let mut tasks = vec![server_task];
        tasks.push(tokio::spawn(forward_reassembly_events(
            events,
            registry,
            Arc::clone(&server),
            cancel.clone(),
        )));

        if let Some(ttl) = config.stale_upload_ttl() {
            tracing::info!(ttl_secs = ttl.as_secs(), "stale upload janitor enabled");
            tasks.push(tokio::spawn(run_janitor(
                coordinator,
                ttl,
                config.janitor_interval(),
                cancel.clone(),
            )));
        }

        Ok(Self {
            server,
            pool,
            cancel,
            tasks,
        })
    }

    pub async fn port(&self) -> u16 {
        self.server.port().await
    }

    /// Stops accepting work, closes connections and drains the workers.
    pub async fn shutdown(self) {
        tracing::info!("stopping services...");
        self.server.shutdown();
        self.cancel.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        self.pool.shutdown().await;
    }
}

/// Runs the daemon until SIGINT.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let daemon = Daemon::start(&config).await?;
    tracing::info!(name = %config.name, port = daemon.port().await, "daemon ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    daemon.shutdown().await;
    Ok(())
}

/// Pushes every reconstruction outcome to the owner's open sessions.
async fn forward_reassembly_events(
    mut events: broadcast::Receiver<ReconstructionResult>,
    registry: Arc<FileRegistry>,
    server: Arc<Server>,
    cancel: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = events.recv() => r,
        };
        let result = match result {
            Ok(r) => r,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "reassembly event forwarder lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        // Deleted while reassembling: nobody to tell.
        let Some(record) = registry.get(result.file_id) else {
            continue;
        };
        let event = convert::reassembly_event(&record.declared_name, &result);
        let msg = match Message::with_payload(
            uuid::Uuid::new_v4().to_string(),
            MessageType::ReassemblyEvent,
            &event,
        ) {
            Ok(m) => m,
            Err(e) => {
                tracing::error!("failed to build reassembly event: {e}");
                continue;
            }
        };
        for sender in server.senders_for(&record.owner_id).await {
            let _ = sender.send_msg(msg.clone());
        }
    }
}

/// Periodically deletes uploads that never completed.
async fn run_janitor(
    coordinator: Arc<IngestCoordinator>,
    ttl: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match coordinator.reap_stale(ttl).await {
                    Ok(0) => {}
                    Ok(reaped) => tracing::info!(reaped, "removed stale uploads"),
                    Err(e) => tracing::warn!(error = %e, "stale upload sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use chunkdrop_ingest_server::encode_binary_message;
    use chunkdrop_protocol::messages::ChunkHeader;
    use futures_util::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    type Ws = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            data_dir: dir.path().to_path_buf(),
            retry_backoff_secs: 0,
            artifact_frame_bytes: 128,
            ..Config::default()
        };
        config.tokens.insert("alice-token".into(), "alice".into());
        config.tokens.insert("bob-token".into(), "bob".into());
        config
    }

    /// WS client that sets pushed reassembly events aside while waiting
    /// for replies.
    struct Client {
        ws: Ws,
        events: VecDeque<Value>,
    }

    impl Client {
        async fn open(daemon: &Daemon) -> Self {
            let url = format!("ws://127.0.0.1:{}", daemon.port().await);
            let (ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
            Self {
                ws,
                events: VecDeque::new(),
            }
        }

        async fn connect(daemon: &Daemon, token: &str) -> Self {
            let mut client = Self::open(daemon).await;
            client
                .send(json!({ "id": "hello-1", "type": "hello", "payload": { "token": token } }))
                .await;
            let welcome = client.reply("hello-1").await;
            assert_eq!(welcome.msg_type, MessageType::Welcome, "{welcome:?}");
            client
        }

        async fn send(&mut self, value: Value) {
            self.ws.send(WsMessage::Text(value.to_string().into())).await.unwrap();
        }

        async fn send_chunk(&mut self, id: &str, seq: u32, total: u32, size: u64, data: &[u8]) {
            let header = ChunkHeader {
                id: id.into(),
                file_name: "report.pdf".into(),
                total_file_size: size,
                sequence_number: seq,
                total_chunks: total,
                is_complete: seq + 1 == total,
                file_type: "application/pdf".into(),
                folder_id: None,
                checksum: String::new(),
            };
            let frame = encode_binary_message(&header, data).unwrap();
            self.ws.send(WsMessage::Binary(frame.into())).await.unwrap();
        }

        async fn next_frame(&mut self) -> WsMessage {
            self.read_frame(false).await.unwrap()
        }

        /// Reads the next frame, setting reassembly events aside. With
        /// `stop_on_event`, returns `None` right after setting one aside.
        async fn read_frame(&mut self, stop_on_event: bool) -> Option<WsMessage> {
            loop {
                let frame = tokio::time::timeout(Duration::from_secs(5), self.ws.next())
                    .await
                    .expect("timed out waiting for frame")
                    .expect("stream ended")
                    .expect("read error");
                match frame {
                    WsMessage::Text(text) => {
                        let msg: Message = serde_json::from_str(&text).unwrap();
                        if msg.msg_type == MessageType::ReassemblyEvent {
                            self.events.push_back(msg.payload().unwrap());
                            if stop_on_event {
                                return None;
                            }
                            continue;
                        }
                        return Some(WsMessage::Text(text));
                    }
                    WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                    other => return Some(other),
                }
            }
        }

        /// Next reply; must carry `id`.
        async fn reply(&mut self, id: &str) -> Message {
            match self.next_frame().await {
                WsMessage::Text(text) => {
                    let msg: Message = serde_json::from_str(&text).unwrap();
                    assert_eq!(msg.id, id, "{msg:?}");
                    msg
                }
                other => panic!("expected text frame, got {other:?}"),
            }
        }

        async fn payload(&mut self, id: &str) -> Value {
            let msg = self.reply(id).await;
            assert!(msg.error.is_none(), "{msg:?}");
            msg.payload().unwrap()
        }

        async fn error_code(&mut self, id: &str) -> i32 {
            self.reply(id).await.error_code().expect("expected an error reply")
        }

        /// Collects artifact frames until `isLast`. Returns their headers
        /// and the joined payload.
        async fn artifact(&mut self, id: &str) -> (Vec<Value>, Vec<u8>) {
            let mut headers = Vec::new();
            let mut bytes = Vec::new();
            loop {
                let frame = match self.next_frame().await {
                    WsMessage::Binary(frame) => frame,
                    other => panic!("expected artifact frame, got {other:?}"),
                };
                let header_len =
                    u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
                let header: Value = serde_json::from_slice(&frame[4..4 + header_len]).unwrap();
                assert_eq!(header["id"], id);
                assert_eq!(header["offset"], bytes.len() as u64);
                bytes.extend_from_slice(&frame[4 + header_len..]);
                let last = header["isLast"] == true;
                headers.push(header);
                if last {
                    return (headers, bytes);
                }
            }
        }

        async fn event(&mut self) -> Value {
            while self.events.is_empty() {
                if let Some(WsMessage::Text(text)) = self.read_frame(true).await {
                    panic!("unexpected message while waiting for event: {text}");
                }
            }
            self.events.pop_front().unwrap()
        }
    }

    #[tokio::test]
    async fn upload_reassemble_fetch_delete() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::start(&test_config(&dir)).await.unwrap();
        let mut client = Client::connect(&daemon, "alice-token").await;

        let parts: Vec<Vec<u8>> = (0..3u8).map(|i| vec![b'a' + i; 100]).collect();
        let mut file_id = String::new();
        for (seq, part) in parts.iter().enumerate() {
            let id = format!("c-{seq}");
            client.send_chunk(&id, seq as u32, 3, 300, part).await;
            let ack = client.payload(&id).await;
            assert_eq!(ack["bytesWritten"], 100);
            let expected = if seq == 2 { "completed" } else { "accepted" };
            assert_eq!(ack["outcome"], expected);
            file_id = ack["fileId"].as_str().unwrap().to_string();
        }

        let event = client.event().await;
        assert_eq!(event["fileId"], file_id.as_str());
        assert_eq!(event["fileName"], "report.pdf");
        assert_eq!(event["state"], "succeeded");

        client
            .send(json!({ "id": "s-1", "type": "file_status", "payload": { "fileId": file_id } }))
            .await;
        let status = client.payload("s-1").await;
        assert_eq!(status["file"]["isComplete"], true);
        assert_eq!(status["file"]["reassembly"]["state"], "succeeded");
        assert_eq!(status["file"]["reassembly"]["artifactSize"], 300);

        client
            .send(json!({ "id": "a-1", "type": "fetch_artifact", "payload": { "fileId": file_id } }))
            .await;
        let (headers, bytes) = client.artifact("a-1").await;
        assert_eq!(bytes, parts.concat());
        // 128 + 128 + 44 bytes.
        assert_eq!(headers.len(), 3);
        for header in &headers {
            assert_eq!(header["type"], "artifact");
            assert_eq!(header["fileType"], "application/pdf");
            assert_eq!(header["size"], 300);
        }
        assert_eq!(headers[2]["offset"], 256);

        client
            .send(json!({ "id": "d-1", "type": "delete_file", "payload": { "fileId": file_id } }))
            .await;
        let deleted = client.payload("d-1").await;
        assert_eq!(deleted["chunksRemoved"], 3);
        assert_eq!(deleted["releasedBytes"], 300);
        assert_eq!(deleted["quota"]["usedSpace"], 0);

        client.send(json!({ "id": "l-1", "type": "list_files" })).await;
        let files = client.payload("l-1").await;
        assert!(files["files"].as_array().unwrap().is_empty());

        drop(client);
        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn json_chunk_fallback_and_errors() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::start(&test_config(&dir)).await.unwrap();
        let mut client = Client::connect(&daemon, "alice-token").await;

        let data = base64::engine::general_purpose::STANDARD.encode(b"hello");
        let chunk = |name: &str, checksum: &str| {
            json!({
                "id": "ignored",
                "fileName": name,
                "totalFileSize": 5,
                "sequenceNumber": 0,
                "totalChunks": 1,
                "isComplete": true,
                "fileType": "text/plain",
                "checksum": checksum,
                "data": data
            })
        };

        client
            .send(json!({ "id": "j-1", "type": "submit_chunk", "payload": chunk("note.txt", "") }))
            .await;
        let ack = client.payload("j-1").await;
        assert_eq!(ack["outcome"], "completed");
        assert_eq!(client.event().await["state"], "succeeded");

        let wrong = "00".repeat(32);
        client
            .send(json!({ "id": "j-2", "type": "submit_chunk", "payload": chunk("other.txt", &wrong) }))
            .await;
        assert_eq!(client.error_code("j-2").await, 400);

        client.send(json!({ "id": "j-3", "type": "submit_chunk" })).await;
        assert_eq!(client.error_code("j-3").await, 400);

        client
            .send(json!({ "id": "s-1", "type": "file_status", "payload": { "fileId": "not-a-uuid" } }))
            .await;
        assert_eq!(client.error_code("s-1").await, 400);

        client
            .send(json!({
                "id": "s-2",
                "type": "file_status",
                "payload": { "fileId": "00000000-0000-4000-8000-000000000000" }
            }))
            .await;
        assert_eq!(client.error_code("s-2").await, 404);

        drop(client);
        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn artifact_of_exact_frame_multiple_ends_on_full_frame() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::start(&test_config(&dir)).await.unwrap();
        let mut client = Client::connect(&daemon, "alice-token").await;

        let data = vec![7u8; 256];
        client.send_chunk("c-0", 0, 1, 256, &data).await;
        let file_id = client.payload("c-0").await["fileId"].as_str().unwrap().to_string();
        assert_eq!(client.event().await["state"], "succeeded");

        client
            .send(json!({ "id": "a-1", "type": "fetch_artifact", "payload": { "fileId": file_id } }))
            .await;
        let (headers, bytes) = client.artifact("a-1").await;
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0]["isLast"], false);
        assert_eq!(bytes, data);

        drop(client);
        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn artifact_of_open_upload_is_not_found() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::start(&test_config(&dir)).await.unwrap();
        let mut client = Client::connect(&daemon, "alice-token").await;

        client.send_chunk("c-0", 0, 2, 10, b"hello").await;
        let file_id = client.payload("c-0").await["fileId"].as_str().unwrap().to_string();

        client
            .send(json!({ "id": "a-1", "type": "fetch_artifact", "payload": { "fileId": file_id } }))
            .await;
        assert_eq!(client.error_code("a-1").await, 404);

        drop(client);
        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn owners_are_isolated() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::start(&test_config(&dir)).await.unwrap();
        let mut alice = Client::connect(&daemon, "alice-token").await;
        let mut bob = Client::connect(&daemon, "bob-token").await;

        alice.send_chunk("c-0", 0, 2, 10, b"hello").await;
        let file_id = alice.payload("c-0").await["fileId"].as_str().unwrap().to_string();

        bob.send(json!({ "id": "b-1", "type": "delete_file", "payload": { "fileId": file_id } }))
            .await;
        assert_eq!(bob.error_code("b-1").await, 404);

        bob.send(json!({ "id": "b-2", "type": "list_files" })).await;
        assert!(bob.payload("b-2").await["files"].as_array().unwrap().is_empty());

        alice.send(json!({ "id": "a-2", "type": "list_files" })).await;
        assert_eq!(alice.payload("a-2").await["files"].as_array().unwrap().len(), 1);

        drop(alice);
        drop(bob);
        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn restart_keeps_finished_files() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let daemon = Daemon::start(&config).await.unwrap();
        let mut client = Client::connect(&daemon, "alice-token").await;
        client.send_chunk("c-0", 0, 1, 5, b"hello").await;
        client.payload("c-0").await;
        client.event().await;
        drop(client);
        daemon.shutdown().await;

        // Account of "alice" (hex file name) out of step with the stored files.
        let account = dir.path().join("quota").join("616c696365.json");
        std::fs::write(&account, r#"{"used_space":999,"max_space":524288000}"#).unwrap();

        let daemon = Daemon::start(&config).await.unwrap();
        let mut client = Client::open(&daemon).await;
        client
            .send(json!({ "id": "h", "type": "hello", "payload": { "token": "alice-token" } }))
            .await;
        assert_eq!(client.payload("h").await["quota"]["usedSpace"], 5);
        drop(client);

        let mut client = Client::connect(&daemon, "alice-token").await;
        client.send(json!({ "id": "l-1", "type": "list_files" })).await;
        let files = client.payload("l-1").await;
        let files = files["files"].as_array().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0]["reassembly"]["state"], "succeeded");

        drop(client);
        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn bad_token_is_rejected() {
        let dir = TempDir::new().unwrap();
        let daemon = Daemon::start(&test_config(&dir)).await.unwrap();
        let mut client = Client::open(&daemon).await;
        client
            .send(json!({ "id": "h", "type": "hello", "payload": { "token": "mallory" } }))
            .await;
        assert_eq!(client.error_code("h").await, 401);

        drop(client);
        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn janitor_reaps_stale_uploads() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            stale_upload_ttl_secs: Some(0),
            janitor_interval_secs: 1,
            ..test_config(&dir)
        };
        let daemon = Daemon::start(&config).await.unwrap();
        let mut client = Client::connect(&daemon, "alice-token").await;

        client.send_chunk("c-0", 0, 3, 30, b"0123456789").await;
        client.payload("c-0").await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        client.send(json!({ "id": "l-1", "type": "list_files" })).await;
        assert!(client.payload("l-1").await["files"].as_array().unwrap().is_empty());

        drop(client);
        daemon.shutdown().await;
    }
}
