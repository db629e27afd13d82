//! Live connection registry and broadcast.
//!
//! The I/O thread is the only writer: it inserts on accept and removes on
//! close.  Producer threads only read, through [`ConnectionRegistry::broadcast`]
//! or [`ConnectionRegistry::snapshot`].
//!
//! # Snapshot, then write (for beginners)
//!
//! Writing to a socket can take a while if the peer is slow.  Holding the
//! registry lock during those writes would stall the I/O thread's next
//! insert or remove, and with it every other subscriber.  Broadcast therefore
//! clones the `Arc<Connection>` handles under a short read lock, releases the
//! lock, and only then writes.  A connection closed in between is still a
//! valid object; its `open` flag makes the write a cheap no-op.
//!
//! A slow peer still delays the peers after it in the same broadcast, since
//! writes are sequential.  There is no per-connection send queue.
//!
//! # Failed writes
//!
//! Broadcast never removes anything.  A peer whose write fails is aborted:
//! marked closed and its socket shut down.  From then on every broadcast
//! skips it, but it stays in the map until the I/O thread wakes on the
//! hang-up, reports the error and removes it.  In that short window
//! [`len`](ConnectionRegistry::len) and [`snapshot`](ConnectionRegistry::snapshot)
//! still include it, while [`subscriber_count`](ConnectionRegistry::subscriber_count)
//! already does not.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use statedeck_core::{encode_frame, Opcode};
use tracing::{debug, warn};

use super::connection::{Connection, ConnectionId};

/// Concurrent map of every accepted connection, upgraded or not.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, conn: Arc<Connection>) {
        self.connections.write().insert(conn.id(), conn);
    }

    pub(crate) fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().remove(&id)
    }

    /// Removes and returns every connection.
    pub(crate) fn drain(&self) -> Vec<Arc<Connection>> {
        self.connections.write().drain().map(|(_, conn)| conn).collect()
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    /// Number of registered connections, including those still negotiating.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Number of connections that would receive a broadcast right now.
    pub fn subscriber_count(&self) -> usize {
        self.connections
            .read()
            .values()
            .filter(|conn| conn.is_handshake_complete() && conn.is_open())
            .count()
    }

    /// Point-in-time copy of the registered connections.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Sends `text` to every upgraded connection and returns how many writes
    /// succeeded.
    ///
    /// Safe to call from any thread, including from inside a handler
    /// callback.  A failed write does not stop the broadcast: the failing
    /// connection is aborted and the I/O thread removes it.
    pub fn broadcast(&self, text: &str) -> usize {
        let frame = encode_frame(Opcode::Text, text.as_bytes());
        let mut delivered = 0;

        for conn in self.snapshot() {
            match conn.send_frame(&frame) {
                Ok(()) => delivered += 1,
                Err(e) if e.is_skip() => {
                    debug!("broadcast skipped connection {}: {e}", conn.id());
                }
                Err(e) => {
                    warn!(
                        "broadcast to connection {} ({}) failed: {e}",
                        conn.id(),
                        conn.peer_addr()
                    );
                    conn.abort(e);
                }
            }
        }

        delivered
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
