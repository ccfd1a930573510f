//! Runtime configuration.
//!
//! Stored as TOML. Every field has a default, so a partial file (or none at
//! all) is fine:
//!
//! ```toml
//! io_timeout_secs = 30
//! log_file = "request_log"
//!
//! [server]
//! bind_addr = "0.0.0.0:8686"
//! pool_size = 5
//!
//! [client]
//! server_addr = "127.0.0.1:8686"
//! workers = 1
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use imgrot_channel::{ClientConfig, DEFAULT_PORT, DEFAULT_POOL_SIZE, ServerConfig};
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "IMGROT_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Deadline for each header read and payload transfer.
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Audit log written by `local` and `client`.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub client: ClientSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Connections served at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    #[serde(default = "default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_server_addr")]
    pub server_addr: SocketAddr,

    /// Concurrent connections to the server.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_io_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_log_file() -> PathBuf {
    PathBuf::from(imgrot_jobs::DEFAULT_LOG_FILE)
}

fn default_bind_addr() -> SocketAddr {
    ([0, 0, 0, 0], DEFAULT_PORT).into()
}

fn default_pool_size() -> usize {
    DEFAULT_POOL_SIZE
}

fn default_scratch_dir() -> PathBuf {
    std::env::temp_dir().join("imgrot-scratch")
}

fn default_server_addr() -> SocketAddr {
    ([127, 0, 0, 1], DEFAULT_PORT).into()
}

fn default_workers() -> usize {
    1
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            pool_size: default_pool_size(),
            scratch_dir: default_scratch_dir(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            workers: default_workers(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            io_timeout_secs: default_io_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            log_file: default_log_file(),
            server: ServerSection::default(),
            client: ClientSection::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `cli_path`, else `$IMGROT_CONFIG`, else defaults.
    pub fn load(cli_path: Option<&Path>) -> anyhow::Result<Self> {
        match resolve_path(cli_path) {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Reads `path`. A missing file yields defaults; a malformed one is an error.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server.pool_size == 0 {
            anyhow::bail!("server.pool_size must be at least 1");
        }
        if self.client.workers == 0 {
            anyhow::bail!("client.workers must be at least 1");
        }
        if self.io_timeout_secs == 0 {
            anyhow::bail!("io_timeout_secs must be at least 1");
        }
        if self.connect_timeout_secs == 0 {
            anyhow::bail!("connect_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.server.bind_addr,
            pool_size: self.server.pool_size,
            scratch_dir: self.server.scratch_dir.clone(),
            io_timeout: Duration::from_secs(self.io_timeout_secs),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_addr: self.client.server_addr,
            workers: self.client.workers,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            io_timeout: Duration::from_secs(self.io_timeout_secs),
        }
    }
}

fn resolve_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    cli_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
}
