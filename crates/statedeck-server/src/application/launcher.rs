//! Port fallback: start on the first candidate port that is free.
//!
//! The server itself takes exactly one port and fails if it is taken.  A
//! subscriber that knows the candidate list checks them in the same order,
//! so the daemon tries them in order too.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::ServerConfig;
use crate::infrastructure::{ConnectionRegistry, ServerError, ServerHandler, WebSocketServer};

/// Errors from [`start_first_available`].
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Every candidate port was already bound.
    #[error("no free port among {tried:?}")]
    NoPortAvailable { tried: Vec<u16> },

    /// A failure that retrying on another port would not fix.
    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Starts a server on the first port in `ports` that binds.
///
/// Only [`ServerError::Bind`] moves on to the next candidate.  Any other
/// error is returned immediately.
///
/// # Errors
///
/// [`LaunchError::NoPortAvailable`] when every candidate is taken (or the
/// list is empty), [`LaunchError::Server`] otherwise.
pub fn start_first_available(
    config: &ServerConfig,
    ports: &[u16],
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn ServerHandler>,
) -> Result<WebSocketServer, LaunchError> {
    for &port in ports {
        let server = WebSocketServer::with_registry(
            config.clone().with_port(port),
            Arc::clone(&registry),
            Arc::clone(&handler),
        );
        match server.start() {
            Ok(addr) => {
                info!("started on {addr}");
                return Ok(server);
            }
            Err(ServerError::Bind { addr, source }) => {
                warn!("{addr} unavailable ({source}), trying the next port");
            }
            Err(other) => return Err(other.into()),
        }
    }

    Err(LaunchError::NoPortAvailable {
        tried: ports.to_vec(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
