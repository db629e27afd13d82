//! Error types for the transport layer.
//!
//! # Which error goes where
//!
//! ```text
//! ServerError       start()/stop() failed; nothing per-connection
//! ConnectionError   one peer misbehaved or vanished; reported via on_error,
//!                   then only that connection is closed
//! TransportError    a write failed; returned by Connection::send
//! ```
//!
//! None of these ever stop the event loop.  Only `stop()` does that.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use statedeck_core::{FrameError, HandshakeError};
use thiserror::Error;

use super::server::ServerState;

/// Failures of the server lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be bound.  The caller may retry with
    /// another port.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The readiness multiplexer could not be created or could not register
    /// the listener.
    #[error("readiness multiplexer error: {0}")]
    Poller(#[source] io::Error),

    /// The I/O thread could not be spawned.
    #[error("failed to spawn the I/O thread: {0}")]
    Spawn(#[source] io::Error),

    /// The I/O thread panicked (usually inside a handler callback).
    #[error("the I/O thread panicked")]
    LoopPanicked,

    /// `stop()` was called from a handler callback.  The loop cannot join
    /// itself.
    #[error("stop() cannot be called from the I/O thread")]
    StopFromLoopThread,

    /// `start()` raced with a `stop()` that has not finished yet.
    #[error("server is {0:?}; retry once it has stopped")]
    InTransition(ServerState),
}

/// Why a single connection is being dropped.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The upgrade request was malformed or missing its key.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// The peer sent a frame that violates RFC 6455.
    #[error("protocol violation: {0}")]
    Protocol(#[from] FrameError),

    /// Reading or writing the socket failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A text frame carried bytes that are not UTF-8.
    #[error("text frame is not valid UTF-8")]
    InvalidUtf8,
}

/// A write to one connection failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection has already been closed.
    #[error("connection is closed")]
    Closed,

    /// The connection has not finished the upgrade, so frames cannot be sent.
    #[error("connection has not completed the handshake")]
    HandshakePending,

    /// The peer stopped draining its socket.
    #[error("write stalled for longer than {0:?}")]
    WriteTimeout(Duration),

    /// An I/O-thread write found the peer's socket full.  `written` bytes of
    /// the frame went out before it stopped.
    #[error("peer is not reading: socket full after {written} of {total} bytes")]
    Backpressure { written: usize, total: usize },

    /// An I/O-thread write found another thread mid-write and did not wait.
    #[error("another write is in progress")]
    WriteInProgress,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// `true` for errors that mean the write was skipped rather than failed.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            TransportError::Closed
                | TransportError::HandshakePending
                | TransportError::WriteInProgress
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
