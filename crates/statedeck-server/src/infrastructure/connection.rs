//! One accepted subscriber connection.
//!
//! A [`Connection`] is shared between the I/O thread (which reads from it and
//! drives the handshake) and any producer thread that broadcasts to it, so
//! every mutable attribute is atomic or behind a lock.
//!
//! # Write path
//!
//! The socket is non-blocking because the I/O thread must never stall on one
//! peer.  There are two kinds of write:
//!
//! ```text
//! send / broadcast (producer threads)  WouldBlock ─► retry until write_timeout
//! handshake reply, pong, close (I/O)   WouldBlock ─► fail now, never wait
//! ```
//!
//! A peer that stops reading can therefore slow down a broadcast, but never
//! the I/O thread.  I/O-thread writes only `try_lock` the write lock: when a
//! producer is mid-write, a pong or close frame is skipped instead of waited
//! for.  Frames from different threads never interleave, and nothing is
//! written after `close()`.
//!
//! # Failure path
//!
//! Only the I/O thread removes connections from the registry.  When a
//! broadcast write fails, [`Connection::abort`] records the error and shuts
//! the socket down.  The I/O thread then sees end-of-stream, reports the
//! recorded error through `on_error`, and removes the connection.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use statedeck_core::{encode_frame, Opcode};
use tracing::debug;

use super::error::TransportError;

/// Pause between attempts when the socket send buffer is full.
const WRITE_RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// Identity of a connection for its whole life.  Also its readiness key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A subscriber connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    stream: TcpStream,
    peer_addr: SocketAddr,
    handshake_complete: AtomicBool,
    open: AtomicBool,
    write_lock: Mutex<()>,
    failure: Mutex<Option<TransportError>>,
    write_timeout: Duration,
}

impl Connection {
    /// Wraps an accepted, already non-blocking stream.
    pub(crate) fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        write_timeout: Duration,
    ) -> Self {
        Self {
            id,
            stream,
            peer_addr,
            handshake_complete: AtomicBool::new(false),
            open: AtomicBool::new(true),
            write_lock: Mutex::new(()),
            failure: Mutex::new(None),
            write_timeout,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// `true` once the upgrade response has been written.  Only such
    /// connections receive broadcasts.
    pub fn is_handshake_complete(&self) -> bool {
        self.handshake_complete.load(Ordering::Acquire)
    }

    /// `false` after [`close`](Self::close) or a failed broadcast write.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Sends `text` as one unfragmented text frame.
    ///
    /// # Errors
    ///
    /// - [`TransportError::HandshakePending`] before the upgrade completed.
    /// - [`TransportError::Closed`] after `close()`.
    /// - [`TransportError::WriteTimeout`] or [`TransportError::Io`] when the
    ///   write itself fails.  The caller decides whether to drop the
    ///   connection.
    pub fn send(&self, text: &str) -> Result<(), TransportError> {
        self.send_frame(&encode_frame(Opcode::Text, text.as_bytes()))
    }

    /// Best-effort close: sends an empty close frame if the connection was
    /// upgraded, then shuts the socket down.
    ///
    /// Never blocks.  The close frame is attempted once and skipped if the
    /// socket is full or another thread is writing.  Calling it again does
    /// nothing.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.is_handshake_complete() {
            match self.write_lock.try_lock() {
                Some(_guard) => {
                    if let Err(e) = self.write_once(&encode_frame(Opcode::Close, &[])) {
                        debug!("close frame to {} not delivered: {e}", self.id);
                    }
                }
                None => debug!("close frame to {} skipped, a write is in progress", self.id),
            }
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("shutdown of {} failed: {e}", self.id);
        }
    }

    // ── Crate-internal ────────────────────────────────────────────────────────

    /// Writes an already encoded frame, waiting up to `write_timeout` for a
    /// full socket to drain.  Broadcast encodes once and calls this for
    /// every connection.  Never call it from the I/O thread.
    pub(crate) fn send_frame(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.is_handshake_complete() {
            return Err(TransportError::HandshakePending);
        }
        let _guard = self.write_lock.lock();
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.write_locked(frame)
    }

    /// Writes an already encoded frame from the I/O thread without waiting.
    pub(crate) fn send_frame_now(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.is_handshake_complete() {
            return Err(TransportError::HandshakePending);
        }
        self.send_now(frame)
    }

    /// Writes `bytes` regardless of handshake state (the upgrade response),
    /// without waiting.
    ///
    /// Fails with [`TransportError::WriteInProgress`] if another thread holds
    /// the write lock, and with [`TransportError::Backpressure`] if the
    /// socket cannot take all of `bytes` at once.  After a partial write the
    /// stream is unusable, so any write failure also shuts the socket down.
    pub(crate) fn send_now(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let Some(_guard) = self.write_lock.try_lock() else {
            return Err(TransportError::WriteInProgress);
        };
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.write_once(bytes).map_err(|e| {
            self.open.store(false, Ordering::Release);
            if let Err(shutdown) = self.stream.shutdown(Shutdown::Both) {
                debug!("shutdown of {} failed: {shutdown}", self.id);
            }
            e
        })
    }

    /// Records `error` as the reason this connection died and shuts the
    /// socket down so the I/O thread notices.  Only the first error is kept.
    pub(crate) fn abort(&self, error: TransportError) {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(error);
            }
        }
        self.open.store(false, Ordering::Release);
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("shutdown of aborted {} failed: {e}", self.id);
        }
    }

    /// Takes the error recorded by [`abort`](Self::abort), if any.
    pub(crate) fn take_failure(&self) -> Option<TransportError> {
        self.failure.lock().take()
    }

    pub(crate) fn mark_handshake_complete(&self) {
        self.handshake_complete.store(true, Ordering::Release);
    }

    pub(crate) fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(buf)
    }

    pub(crate) fn stream(&self) -> &TcpStream {
        &self.stream
    }

    /// Writes all of `bytes`, retrying a full socket until `write_timeout`.
    /// The caller must hold `write_lock`.
    fn write_locked(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.write_timeout;
        let mut written = 0;

        while written < bytes.len() {
            match (&self.stream).write(&bytes[written..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::WriteTimeout(self.write_timeout));
                    }
                    thread::sleep(WRITE_RETRY_BACKOFF);
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        Ok(())
    }

    /// Writes all of `bytes` or fails on the first `WouldBlock`.  The caller
    /// must hold `write_lock`.
    fn write_once(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut written = 0;

        while written < bytes.len() {
            match (&self.stream).write(&bytes[written..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(TransportError::Backpressure {
                        written,
                        total: bytes.len(),
                    });
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        Ok(())
    }
}

// ── Test support ──────────────────────────────────────────────────────────────


// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::test_support::{connection_pair, upgraded_pair};
    use super::*;

    fn read_exact(client: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).expect("client read");
        buf
    }

    #[test]
    fn test_connection_id_displays_with_hash() {
        assert_eq!(ConnectionId(7).to_string(), "#7");
    }

    #[test]
    fn test_new_connection_is_open_but_not_upgraded() {
        let (conn, _client) = connection_pair();

        assert!(conn.is_open());
        assert!(!conn.is_handshake_complete());
    }

    #[test]
    fn test_send_before_handshake_is_rejected() {
        let (conn, _client) = connection_pair();

        let result = conn.send("hello");

        assert!(matches!(result, Err(TransportError::HandshakePending)));
    }

    #[test]
    fn test_send_writes_one_unmasked_text_frame() {
        // Arrange
        let (conn, mut client) = upgraded_pair();

        // Act
        conn.send("hello").unwrap();

        // Assert
        assert_eq!(read_exact(&mut client, 7), encode_frame(Opcode::Text, b"hello"));
    }

    #[test]
    fn test_close_sends_close_frame_then_eof() {
        let (conn, mut client) = upgraded_pair();

        conn.close();

        assert_eq!(read_exact(&mut client, 2), vec![0x88, 0x00]);
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty(), "nothing may follow the close frame");
        assert!(!conn.is_open());
    }

    #[test]
    fn test_close_before_handshake_sends_no_frame() {
        let (conn, mut client) = connection_pair();

        conn.close();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_send_after_close_reports_closed() {
        let (conn, _client) = upgraded_pair();
        conn.close();

        assert!(matches!(conn.send("late"), Err(TransportError::Closed)));
    }

    #[test]
    fn test_close_twice_is_harmless() {
        let (conn, _client) = upgraded_pair();

        conn.close();
        conn.close();

        assert!(!conn.is_open());
    }

    #[test]
    fn test_abort_keeps_first_failure_only() {
        // Arrange
        let (conn, _client) = upgraded_pair();

        // Act
        conn.abort(TransportError::WriteTimeout(Duration::from_millis(5)));
        conn.abort(TransportError::Closed);

        // Assert
        assert!(!conn.is_open());
        assert!(matches!(
            conn.take_failure(),
            Some(TransportError::WriteTimeout(_))
        ));
        assert!(conn.take_failure().is_none(), "failure is taken once");
    }

    #[test]
    fn test_abort_makes_local_reads_hit_eof() {
        let (conn, _client) = upgraded_pair();

        conn.abort(TransportError::Closed);

        let mut buf = [0u8; 16];
        assert_eq!(conn.read(&mut buf).unwrap(), 0);
    }

    /// Writes to the raw socket until the kernel refuses more.
    fn fill_socket(conn: &Connection) {
        let chunk = vec![0u8; 64 * 1024];
        loop {
            match (&conn.stream).write(&chunk) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) => panic!("unexpected write error: {e}"),
            }
        }
    }

    #[test]
    fn test_send_now_fails_fast_when_peer_stops_reading() {
        // Arrange: the client never reads
        let (conn, _client) = upgraded_pair();
        let frame = encode_frame(Opcode::Pong, &[0u8; 125]);
        let started = Instant::now();

        // Act
        let mut result = Ok(());
        for _ in 0..1_000_000 {
            result = conn.send_frame_now(&frame);
            if result.is_err() {
                break;
            }
        }

        // Assert
        assert!(matches!(result, Err(TransportError::Backpressure { .. })), "{result:?}");
        assert!(started.elapsed() < conn.write_timeout, "must not wait for the peer");
        assert!(!conn.is_open(), "a half-written frame leaves the stream unusable");
    }

    #[test]
    fn test_send_now_does_not_wait_for_other_writers() {
        let (conn, _client) = upgraded_pair();
        let _producer = conn.write_lock.lock();

        let result = conn.send_frame_now(&encode_frame(Opcode::Pong, b"x"));

        assert!(matches!(result, Err(TransportError::WriteInProgress)));
        assert!(conn.is_open());
    }

    #[test]
    fn test_close_does_not_wait_on_full_socket() {
        // Arrange
        let (conn, _client) = upgraded_pair();
        fill_socket(&conn);
        let started = Instant::now();

        // Act
        conn.close();

        // Assert
        assert!(started.elapsed() < conn.write_timeout);
        assert!(!conn.is_open());
    }

    #[test]
    fn test_handshake_reply_goes_out_before_upgrade() {
        let (conn, mut client) = connection_pair();

        conn.send_now(b"HTTP/1.1 101\r\n\r\n").unwrap();

        assert_eq!(read_exact(&mut client, 16), b"HTTP/1.1 101\r\n\r\n");
    }
}
