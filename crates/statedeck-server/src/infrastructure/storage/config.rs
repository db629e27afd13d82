//! TOML configuration file for the `statedeck` daemon.
//!
//! Every field is optional.  Missing fields take the defaults below, and a
//! missing file is the same as an empty one, so the daemon runs without any
//! configuration on first start.
//!
//! ```toml
//! log_level = "info"
//!
//! [server]
//! bind_address = "127.0.0.1"
//! ports = [42023, 43060, 43020]
//! poll_timeout_ms = 1000
//! read_buffer_size = 8192
//! max_frame_size = 16777216
//! max_handshake_size = 8192
//! write_timeout_ms = 5000
//! max_connections = 64
//!
//! [publisher]
//! heartbeat_interval_ms = 1000
//!
//! [[features]]
//! id = "status-overlay"
//! name = "Status Overlay"
//! active = true
//! ```

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ServerConfig, DEFAULT_PORTS};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `bind_address` is not an IP address.
    #[error("invalid bind address: {0:?}")]
    InvalidBindAddress(String),

    /// `ports` is empty.
    #[error("no listening ports configured")]
    NoPorts,
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub publisher: PublisherSection,
    /// Toggleable features offered to subscribers.
    #[serde(default)]
    pub features: Vec<FeatureEntry>,
}

/// `[server]`: listener and transport limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSection {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Candidate ports, tried in order until one binds.
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_max_handshake_size")]
    pub max_handshake_size: usize,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// `[publisher]`: the daemon's own periodic payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublisherSection {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

/// One `[[features]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_ports() -> Vec<u16> {
    DEFAULT_PORTS.to_vec()
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_read_buffer_size() -> usize {
    8192
}
fn default_max_frame_size() -> usize {
    16 * 1024 * 1024
}
fn default_max_handshake_size() -> usize {
    8192
}
fn default_write_timeout_ms() -> u64 {
    5000
}
fn default_max_connections() -> usize {
    64
}
fn default_heartbeat_interval_ms() -> u64 {
    1000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerSection::default(),
            publisher: PublisherSection::default(),
            features: Vec::new(),
        }
    }
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            ports: default_ports(),
            poll_timeout_ms: default_poll_timeout_ms(),
            read_buffer_size: default_read_buffer_size(),
            max_frame_size: default_max_frame_size(),
            max_handshake_size: default_max_handshake_size(),
            write_timeout_ms: default_write_timeout_ms(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl ServerSection {
    /// Builds the runtime [`ServerConfig`].  The port is left at the first
    /// candidate; the launcher overrides it per attempt.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidBindAddress`] or [`ConfigError::NoPorts`].
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let bind_address: IpAddr = self
            .bind_address
            .parse()
            .map_err(|_| ConfigError::InvalidBindAddress(self.bind_address.clone()))?;
        let port = *self.ports.first().ok_or(ConfigError::NoPorts)?;

        Ok(ServerConfig {
            bind_address,
            port,
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
            read_buffer_size: self.read_buffer_size,
            max_frame_size: self.max_frame_size,
            max_handshake_size: self.max_handshake_size,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            max_connections: self.max_connections,
        })
    }
}

impl PublisherSection {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
