//! Daemon configuration management.
//!
//! Configuration is stored as TOML at `$CHUNKDROP_CONFIG` or, when
//! unset, `~/.config/chunkdrop/daemon.toml`.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chunkdrop_ingest::{AnyFolder, CompletionPolicy, FolderDirectory, StaticFolders};
use chunkdrop_ingest_server::{ServerConfig, StaticTokens};
use chunkdrop_protocol::constants::RECOMMENDED_CHUNK_SIZE;
use chunkdrop_reassembly::WorkerConfig;
use chunkdrop_store::{DEFAULT_MAX_SPACE, OwnerId};
use serde::{Deserialize, Serialize};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "CHUNKDROP_CONFIG";

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Display name of this daemon (hostname by default).
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,

    /// WebSocket server port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Root for records, chunks and quota.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Where reconstructed files land. Defaults to `{data_dir}/artifacts`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,

    #[serde(default)]
    pub completion_policy: CompletionPolicy,

    /// Quota for owners without an explicit limit, in bytes.
    #[serde(default = "default_max_space")]
    pub default_max_space: u64,

    /// Reassembly worker tasks.
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,

    /// Incomplete uploads older than this are deleted. Disabled when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stale_upload_ttl_secs: Option<u64>,

    #[serde(default = "default_janitor_interval_secs")]
    pub janitor_interval_secs: u64,

    /// Largest payload of one `fetch_artifact` frame, in bytes.
    #[serde(default = "default_artifact_frame_bytes")]
    pub artifact_frame_bytes: usize,

    /// Bearer token to owner id.
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,

    /// Known folders per owner id. Empty accepts every folder.
    #[serde(default)]
    pub folders: BTreeMap<String, Vec<String>>,
}

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "chunkdrop".into())
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    7420
}

fn default_max_connections() -> usize {
    1024
}

fn default_data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("chunkdrop")
}

fn default_max_space() -> u64 {
    DEFAULT_MAX_SPACE
}

fn default_workers() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_secs() -> u64 {
    2
}

fn default_janitor_interval_secs() -> u64 {
    300
}

fn default_artifact_frame_bytes() -> usize {
    RECOMMENDED_CHUNK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            bind_addr: default_bind_addr(),
            port: default_port(),
            max_connections: default_max_connections(),
            data_dir: default_data_dir(),
            artifact_dir: None,
            completion_policy: CompletionPolicy::default(),
            default_max_space: default_max_space(),
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            retry_backoff_secs: default_retry_backoff_secs(),
            stale_upload_ttl_secs: None,
            janitor_interval_secs: default_janitor_interval_secs(),
            artifact_frame_bytes: default_artifact_frame_bytes(),
            tokens: BTreeMap::new(),
            folders: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            Ok(config)
        }
    }

    /// Saves the configuration, readable by the current user only.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Tokens live in here.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("artifacts"))
    }

    pub fn stale_upload_ttl(&self) -> Option<Duration> {
        self.stale_upload_ttl_secs.map(Duration::from_secs)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_secs(self.janitor_interval_secs.max(1))
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind_addr,
            port: self.port,
            max_connections: self.max_connections,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            workers: self.workers,
            max_attempts: self.max_attempts.max(1),
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
        }
    }

    pub fn authenticator(&self) -> StaticTokens {
        self.tokens
            .iter()
            .map(|(token, owner)| (token.clone(), OwnerId::new(owner.as_str())))
            .collect()
    }

    pub fn folder_directory(&self) -> Arc<dyn FolderDirectory> {
        if self.folders.is_empty() {
            return Arc::new(AnyFolder);
        }
        let mut folders = StaticFolders::new();
        for (owner, ids) in &self.folders {
            for id in ids {
                folders.insert(OwnerId::new(owner.as_str()), id.as_str());
            }
        }
        Arc::new(folders)
    }
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".into()))
}

/// Returns the configuration file path.
fn config_path() -> PathBuf {
    match std::env::var_os(CONFIG_ENV) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => home_dir().join(".config").join("chunkdrop").join("daemon.toml"),
    }
}
