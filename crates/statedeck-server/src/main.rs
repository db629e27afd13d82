//! StateDeck daemon: entry point.
//!
//! Starts the WebSocket publisher on the first free candidate port, offers
//! the features listed in the config file to subscribers, and publishes a
//! `HEARTBEAT` payload on a fixed interval until Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! statedeck [OPTIONS]
//!
//! Options:
//!   --config <PATH>       TOML config file (missing file = defaults)
//!   --bind <IP>           Interface to bind [default from config: 127.0.0.1]
//!   --port <PORT>         Candidate port, repeatable [default: 42023 43060 43020]
//!   --heartbeat-ms <MS>   Heartbeat interval in milliseconds [default: 1000]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                 | Equivalent flag            |
//! |--------------------------|----------------------------|
//! | `STATEDECK_CONFIG`       | `--config`                 |
//! | `STATEDECK_BIND`         | `--bind`                   |
//! | `STATEDECK_PORTS`        | `--port` (comma-separated) |
//! | `STATEDECK_HEARTBEAT_MS` | `--heartbeat-ms`           |
//!
//! `RUST_LOG` overrides the config file's `log_level`.
//!
//! # Threads
//!
//! ```text
//! tokio runtime ── Ctrl+C listener + heartbeat ticker
//!                     └─ spawn_blocking ─► DeckSession::publish ─► broadcast
//! statedeck-io-<port> ── event loop (accept, handshake, frames, callbacks)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use statedeck_core::StatePayload;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use statedeck_server::application::{start_first_available, DeckSession, InMemoryFeatures};
use statedeck_server::infrastructure::storage::{load_config, AppConfig};
use statedeck_server::infrastructure::ConnectionRegistry;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// StateDeck live-state WebSocket publisher.
#[derive(Debug, Parser)]
#[command(
    name = "statedeck",
    about = "Publishes live state to WebSocket subscribers",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "STATEDECK_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind, overriding `[server] bind_address`.
    #[arg(long, env = "STATEDECK_BIND")]
    bind: Option<String>,

    /// Candidate port, tried in the order given.  Overrides `[server] ports`.
    #[arg(long = "port", env = "STATEDECK_PORTS", value_delimiter = ',')]
    ports: Vec<u16>,

    /// Heartbeat interval in milliseconds.
    #[arg(long, env = "STATEDECK_HEARTBEAT_MS")]
    heartbeat_ms: Option<u64>,
}

impl Cli {
    /// Loads the config file (if any) and applies the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    fn into_app_config(self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => AppConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if !self.ports.is_empty() {
            config.server.ports = self.ports;
        }
        if let Some(ms) = self.heartbeat_ms {
            config.publisher.heartbeat_interval_ms = ms;
        }
        Ok(config)
    }
}

/// The periodic liveness payload.
fn heartbeat_payload(started: Instant, subscribers: usize) -> StatePayload {
    StatePayload::new("HEARTBEAT")
        .with("uptimeSecs", started.elapsed().as_secs())
        .with("subscribers", subscribers as u64)
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_app_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let server_config = config
        .server
        .to_server_config()
        .context("invalid [server] configuration")?;

    let registry = Arc::new(ConnectionRegistry::new());
    let features = Arc::new(InMemoryFeatures::from_entries(&config.features));
    let session = Arc::new(DeckSession::new(Arc::clone(&registry), features));
    let handler = Arc::clone(&session);

    let server = start_first_available(&server_config, &config.server.ports, registry, handler)
        .context("failed to start the WebSocket server")?;

    let interval = config
        .publisher
        .heartbeat_interval()
        .max(Duration::from_millis(10));
    info!("StateDeck running, heartbeat every {interval:?}");

    // ── Heartbeat until Ctrl+C ────────────────────────────────────────────────
    let started = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal.context("failed to listen for Ctrl+C")?;
                info!("received Ctrl+C, shutting down");
                break;
            }
            _ = ticker.tick() => {
                let session = Arc::clone(&session);
                // Broadcast writes block; keep them off the async workers.
                tokio::task::spawn_blocking(move || {
                    let payload = heartbeat_payload(started, session.registry().subscriber_count());
                    session.publish(&payload);
                });
            }
        }
    }

    // stop() joins the I/O thread.
    let stopped = tokio::task::spawn_blocking(move || server.stop())
        .await
        .context("shutdown task failed")?;
    if let Err(e) = stopped {
        warn!("server did not stop cleanly: {e}");
    }

    info!("StateDeck stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
