//! Lifecycle callbacks the embedding application implements.
//!
//! The server is generic over behaviour through one injected trait object
//! rather than through subclassing.  Every callback except
//! [`ServerHandler::on_start`] runs on the I/O thread, so a slow callback
//! delays every connection.  Hand long work off to another thread.
//!
//! # Order of callbacks for one connection
//!
//! ```text
//! accept ─► (handshake ok) ─► on_open ─► on_message* ─► [on_error] ─► on_close
//!        └► (handshake fails) ─► on_error            (no on_open, no on_close)
//! ```
//!
//! `on_close` fires after the connection has been removed from the registry,
//! so a broadcast issued from inside it no longer reaches that peer.

use std::net::SocketAddr;
use std::sync::Arc;

use super::connection::Connection;
use super::error::ConnectionError;

/// The five server lifecycle callbacks.
///
/// Only `on_message` is required; the rest default to doing nothing.
pub trait ServerHandler: Send + Sync {
    /// The listener is bound and the I/O thread is running.  Called on the
    /// thread that called `start()`.
    fn on_start(&self, _local_addr: SocketAddr) {}

    /// A connection completed the upgrade handshake.
    fn on_open(&self, _conn: &Arc<Connection>) {}

    /// An upgraded connection is gone, for whatever reason.
    fn on_close(&self, _conn: &Arc<Connection>) {}

    /// A complete text frame arrived.
    fn on_message(&self, conn: &Arc<Connection>, text: &str);

    /// A connection is about to be dropped because of `error`.
    fn on_error(&self, _conn: &Arc<Connection>, _error: &ConnectionError) {}
}
