//! The single readiness-driven I/O thread.
//!
//! # How the loop works (for beginners)
//!
//! Every socket is non-blocking and registered with a [`Poller`] (epoll on
//! Linux, kqueue on macOS, wepoll on Windows).  The thread sleeps in
//! `Poller::wait` until at least one socket is readable or the timeout
//! expires, then handles exactly the sockets that are ready:
//!
//! ```text
//! key 0 (listener) ──► accept until WouldBlock, register each new peer
//! key N (peer N)   ──► read once, append to N's inbound buffer, then
//!                        not upgraded: try to parse the HTTP upgrade request
//!                        upgraded:     decode as many whole frames as present
//! ```
//!
//! Registrations are oneshot: after an event fires, the source stays silent
//! until it is re-armed with `modify`.  Each handler re-arms its source
//! before returning, unless the source was just removed.
//!
//! The thread never waits on a peer.  Its own writes (upgrade response,
//! pong, close frame) are attempted once: a peer whose socket is full when
//! the server needs to answer it is disconnected with
//! `TransportError::Backpressure` instead of holding up everyone else.
//!
//! # Partial input
//!
//! A read may end in the middle of a frame or of the upgrade request.  The
//! unconsumed tail stays in the connection's inbound buffer and is completed
//! by later reads.  Bytes a client pipelines right behind its upgrade request
//! are decoded as frames in the same pass.

use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use polling::{Event, Poller};
use statedeck_core::protocol::frame::decode_frame_limited;
use statedeck_core::{
    encode_frame, parse_upgrade_request, upgrade_response, Frame, FrameDecode, HandshakeError,
    HandshakeParse, Opcode,
};
use tracing::{debug, error, info, warn};

use super::connection::{Connection, ConnectionId};
use super::error::{ConnectionError, TransportError};
use super::handler::ServerHandler;
use super::registry::ConnectionRegistry;
use crate::domain::ServerConfig;

/// Readiness key of the listening socket.  Connection ids start at 1.
pub(crate) const LISTENER_KEY: usize = 0;

/// Pause after a failed `wait` so a persistent error does not spin the CPU.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// What to do with a connection after handling its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Keep it and wait for more bytes.
    Continue,
    /// The peer sent a close frame.
    Close,
}

/// State owned by the I/O thread.
pub(crate) struct EventLoop {
    listener: TcpListener,
    poller: Arc<Poller>,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn ServerHandler>,
    running: Arc<AtomicBool>,
    config: ServerConfig,
    /// Inbound bytes not yet consumed, per connection.
    pending: HashMap<ConnectionId, Vec<u8>>,
    read_buf: Vec<u8>,
    next_id: usize,
}

impl EventLoop {
    /// `listener` must already be non-blocking and registered under
    /// [`LISTENER_KEY`].
    pub(crate) fn new(
        listener: TcpListener,
        poller: Arc<Poller>,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<dyn ServerHandler>,
        running: Arc<AtomicBool>,
        config: ServerConfig,
    ) -> Self {
        let read_buf = vec![0u8; config.read_buffer_size.max(1)];
        Self {
            listener,
            poller,
            registry,
            handler,
            running,
            config,
            pending: HashMap::new(),
            read_buf,
            next_id: LISTENER_KEY + 1,
        }
    }

    /// Runs until the running flag is cleared, then closes every connection.
    pub(crate) fn run(mut self) {
        let mut events = Vec::new();
        debug!("event loop started");

        while self.running.load(Ordering::Acquire) {
            events.clear();
            match self
                .poller
                .wait(&mut events, Some(self.config.poll_timeout))
            {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("readiness wait failed: {e}");
                    thread::sleep(POLL_ERROR_BACKOFF);
                    continue;
                }
            }

            for event in &events {
                if !self.running.load(Ordering::Acquire) {
                    break;
                }
                if event.key == LISTENER_KEY {
                    self.accept_pending();
                } else {
                    self.service(ConnectionId(event.key));
                }
            }
        }

        self.shutdown();
    }

    // ── Accept ────────────────────────────────────────────────────────────────

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer_addr)) => self.register(stream, peer_addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }

        if let Err(e) = self
            .poller
            .modify(&self.listener, Event::readable(LISTENER_KEY))
        {
            error!("failed to re-arm the listener: {e}");
        }
    }

    fn register(&mut self, stream: TcpStream, peer_addr: SocketAddr) {
        if self.registry.len() >= self.config.max_connections {
            warn!(
                "rejecting {peer_addr}: connection limit of {} reached",
                self.config.max_connections
            );
            return;
        }
        if let Err(e) = stream.set_nonblocking(true) {
            warn!("rejecting {peer_addr}: cannot make socket non-blocking: {e}");
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY not set for {peer_addr}: {e}");
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;

        let conn = Arc::new(Connection::new(
            id,
            stream,
            peer_addr,
            self.config.write_timeout,
        ));
        if let Err(e) = self.poller.add(conn.stream(), Event::readable(id.0)) {
            warn!("rejecting {peer_addr}: cannot register with the poller: {e}");
            return;
        }

        self.registry.insert(conn);
        info!("accepted connection {id} from {peer_addr}");
    }

    // ── Read ──────────────────────────────────────────────────────────────────

    fn service(&mut self, id: ConnectionId) {
        let Some(conn) = self.registry.get(id) else {
            debug!("readiness event for unknown connection {id}");
            return;
        };

        let n = match conn.read(&mut self.read_buf) {
            Ok(0) => {
                // Peer hung up, or a failed broadcast shut the socket down.
                let error = conn.take_failure().map(ConnectionError::Transport);
                debug!("connection {id} reached end of stream");
                self.disconnect(&conn, error);
                return;
            }
            Ok(n) => n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                self.rearm(&conn);
                return;
            }
            Err(e) => {
                let error = ConnectionError::Transport(TransportError::Io(e));
                self.disconnect(&conn, Some(error));
                return;
            }
        };
        self.pending
            .entry(id)
            .or_default()
            .extend_from_slice(&self.read_buf[..n]);

        match self.process_input(&conn) {
            Ok(Flow::Continue) => self.rearm(&conn),
            Ok(Flow::Close) => self.disconnect(&conn, None),
            Err(e) => self.disconnect(&conn, Some(e)),
        }
    }

    fn process_input(&mut self, conn: &Arc<Connection>) -> Result<Flow, ConnectionError> {
        if !conn.is_handshake_complete() {
            self.process_handshake(conn)?;
            if !conn.is_handshake_complete() {
                return Ok(Flow::Continue);
            }
        }
        self.process_frames(conn)
    }

    /// Upgrades the connection once its whole request head has arrived.
    fn process_handshake(&mut self, conn: &Arc<Connection>) -> Result<(), ConnectionError> {
        let buffer = self.pending.entry(conn.id()).or_default();

        let limit = self.config.max_handshake_size;
        let too_large = || HandshakeError::RequestTooLarge { limit };

        let (request, consumed) = match parse_upgrade_request(buffer.as_slice())? {
            HandshakeParse::Complete { consumed, .. } if consumed > limit => {
                return Err(too_large().into());
            }
            HandshakeParse::Complete { request, consumed } => (request, consumed),
            HandshakeParse::Incomplete if buffer.len() > limit => {
                return Err(too_large().into());
            }
            HandshakeParse::Incomplete => return Ok(()),
        };
        buffer.drain(..consumed);

        conn.send_now(upgrade_response(&request.key).as_bytes())?;
        conn.mark_handshake_complete();
        info!(
            "connection {} upgraded (target {}, peer {})",
            conn.id(),
            request.target,
            conn.peer_addr()
        );
        self.handler.on_open(conn);
        Ok(())
    }

    /// Decodes and dispatches every whole frame in the inbound buffer.
    fn process_frames(&mut self, conn: &Arc<Connection>) -> Result<Flow, ConnectionError> {
        loop {
            let buffer = self.pending.entry(conn.id()).or_default();
            let frame = match decode_frame_limited(buffer.as_slice(), self.config.max_frame_size)? {
                FrameDecode::Complete { frame, consumed } => {
                    buffer.drain(..consumed);
                    frame
                }
                FrameDecode::Incomplete { needed } => {
                    if !buffer.is_empty() {
                        debug!("connection {} waiting for {needed} more byte(s)", conn.id());
                    }
                    return Ok(Flow::Continue);
                }
            };

            if self.dispatch(conn, frame)? == Flow::Close {
                return Ok(Flow::Close);
            }
        }
    }

    fn dispatch(&self, conn: &Arc<Connection>, frame: Frame) -> Result<Flow, ConnectionError> {
        match frame.opcode {
            Opcode::Text if frame.fin => {
                let text =
                    String::from_utf8(frame.payload).map_err(|_| ConnectionError::InvalidUtf8)?;
                debug!("connection {} sent {} byte(s) of text", conn.id(), text.len());
                self.handler.on_message(conn, &text);
            }
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                debug!(
                    "ignoring {:?} frame (fin={}) from connection {}",
                    frame.opcode,
                    frame.fin,
                    conn.id()
                );
            }
            Opcode::Ping => {
                let pong = encode_frame(Opcode::Pong, &frame.payload);
                match conn.send_frame_now(&pong) {
                    Ok(()) => {}
                    Err(e) if e.is_skip() => {
                        debug!("pong to connection {} skipped: {e}", conn.id());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Opcode::Pong => {}
            Opcode::Close => {
                debug!("connection {} sent a close frame", conn.id());
                return Ok(Flow::Close);
            }
        }
        Ok(Flow::Continue)
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    fn rearm(&self, conn: &Connection) {
        if let Err(e) = self
            .poller
            .modify(conn.stream(), Event::readable(conn.id().0))
        {
            warn!("failed to re-arm connection {}: {e}", conn.id());
        }
    }

    /// Reports `error`, closes the connection, and forgets it.
    fn disconnect(&mut self, conn: &Arc<Connection>, error: Option<ConnectionError>) {
        let id = conn.id();
        if let Some(error) = &error {
            warn!("connection {id} ({}) failed: {error}", conn.peer_addr());
            self.handler.on_error(conn, error);
        }

        if let Err(e) = self.poller.delete(conn.stream()) {
            debug!("failed to deregister connection {id}: {e}");
        }
        conn.close();
        self.registry.remove(id);
        self.pending.remove(&id);

        if conn.is_handshake_complete() {
            info!("connection {id} closed");
            self.handler.on_close(conn);
        }
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.poller.delete(&self.listener) {
            debug!("failed to deregister the listener: {e}");
        }

        let remaining = self.registry.drain();
        info!("event loop stopping, closing {} connection(s)", remaining.len());
        for conn in remaining {
            if let Err(e) = self.poller.delete(conn.stream()) {
                debug!("failed to deregister connection {}: {e}", conn.id());
            }
            conn.close();
            if conn.is_handshake_complete() {
                self.handler.on_close(&conn);
            }
        }
        self.pending.clear();
    }
}
