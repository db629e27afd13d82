//! Shared helpers for the statedeck-server integration tests.
//!
//! - [`RecordingHandler`] forwards every lifecycle callback to a channel so a
//!   test can assert on the order of events from its own thread.
//! - [`RawClient`] is a deliberately low-level blocking client.  It writes
//!   exactly the bytes a test asks for, which lets tests split the handshake
//!   or a frame across several TCP segments.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use statedeck_core::protocol::frame::encode_masked_frame;
use statedeck_core::{decode_frame, Frame, FrameDecode, Opcode};
use statedeck_server::domain::ServerConfig;
use statedeck_server::infrastructure::{
    Connection, ConnectionError, ConnectionId, ServerHandler, WebSocketServer,
};

/// How long any single wait in these tests may take before it fails.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// The RFC 6455 sample key and its accept token.
pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
pub const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

const CLIENT_MASK: [u8; 4] = [0x12, 0x34, 0x56, 0x78];

// ── Recording handler ─────────────────────────────────────────────────────────

/// One observed callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start(SocketAddr),
    Open(ConnectionId),
    Message(ConnectionId, String),
    Close(ConnectionId),
    /// The error's display text.
    Error(ConnectionId, String),
}

/// Reports callbacks over a channel, optionally echoing text back.
pub struct RecordingHandler {
    events: Sender<Event>,
    echo: bool,
}

impl RecordingHandler {
    pub fn new() -> (Arc<Self>, Receiver<Event>) {
        Self::build(false)
    }

    /// Like [`new`](Self::new), but every text message is sent back.
    pub fn echoing() -> (Arc<Self>, Receiver<Event>) {
        Self::build(true)
    }

    fn build(echo: bool) -> (Arc<Self>, Receiver<Event>) {
        let (events, rx) = mpsc::channel();
        (Arc::new(Self { events, echo }), rx)
    }

    fn record(&self, event: Event) {
        // The test may already have finished and dropped the receiver.
        let _ = self.events.send(event);
    }
}

impl ServerHandler for RecordingHandler {
    fn on_start(&self, local_addr: SocketAddr) {
        self.record(Event::Start(local_addr));
    }

    fn on_open(&self, conn: &Arc<Connection>) {
        self.record(Event::Open(conn.id()));
    }

    fn on_close(&self, conn: &Arc<Connection>) {
        self.record(Event::Close(conn.id()));
    }

    fn on_message(&self, conn: &Arc<Connection>, text: &str) {
        if self.echo {
            conn.send(text).expect("echo must succeed");
        }
        self.record(Event::Message(conn.id(), text.to_string()));
    }

    fn on_error(&self, conn: &Arc<Connection>, error: &ConnectionError) {
        self.record(Event::Error(conn.id(), error.to_string()));
    }
}

/// Waits for the next event.
pub fn next_event(rx: &Receiver<Event>) -> Event {
    rx.recv_timeout(TIMEOUT)
        .expect("timed out waiting for a server callback")
}

/// Asserts that no event arrives within `window`.
pub fn assert_no_event(rx: &Receiver<Event>, window: Duration) {
    if let Ok(event) = rx.recv_timeout(window) {
        panic!("unexpected callback: {event:?}");
    }
}

/// Polls `condition` until it holds or [`TIMEOUT`] expires.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + TIMEOUT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting until {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

// ── Server setup ──────────────────────────────────────────────────────────────

/// A loopback config on an ephemeral port.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        poll_timeout: Duration::from_millis(50),
        ..ServerConfig::default()
    }
    .with_port(0)
}

/// Starts a server with a [`RecordingHandler`] and consumes its `Start` event.
pub fn start_recording_server(
    config: ServerConfig,
    echo: bool,
) -> (WebSocketServer, SocketAddr, Receiver<Event>) {
    let (handler, rx) = RecordingHandler::build(echo);
    let server = WebSocketServer::new(config, handler);
    let addr = server.start().expect("server must start");
    assert_eq!(next_event(&rx), Event::Start(addr));
    (server, addr, rx)
}

// ── Raw client ────────────────────────────────────────────────────────────────

/// The upgrade request a browser would send for `SAMPLE_KEY`.
pub fn upgrade_request(addr: SocketAddr) -> String {
    format!(
        "GET /state HTTP/1.1\r\n\
         Host: {addr}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {SAMPLE_KEY}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    )
}

/// A blocking client that speaks the wire protocol by hand.
pub struct RawClient {
    stream: TcpStream,
    addr: SocketAddr,
    inbound: Vec<u8>,
}

impl RawClient {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream.set_read_timeout(Some(TIMEOUT)).expect("read timeout");
        stream.set_nodelay(true).expect("nodelay");
        Self {
            stream,
            addr,
            inbound: Vec::new(),
        }
    }

    /// Connects and completes the upgrade.
    pub fn connect_upgraded(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr);
        client.handshake();
        client
    }

    /// Sends the upgrade request and checks the `101` response.
    pub fn handshake(&mut self) {
        let request = upgrade_request(self.addr);
        self.send_raw(request.as_bytes());
        self.expect_upgrade_response();
    }

    /// Reads the response head and asserts it is a correct `101`.  Bytes
    /// after the head are kept for [`read_frame`](Self::read_frame).
    pub fn expect_upgrade_response(&mut self) {
        let end = loop {
            if let Some(pos) = find(&self.inbound, b"\r\n\r\n") {
                break pos + 4;
            }
            self.fill();
        };
        let head: Vec<u8> = self.inbound.drain(..end).collect();
        let head = String::from_utf8(head).expect("response head is UTF-8");

        assert!(
            head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"),
            "unexpected response: {head:?}"
        );
        assert!(
            head.contains(&format!("Sec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n")),
            "wrong accept token in {head:?}"
        );
    }

    /// Gives up the framing helpers and returns the socket, e.g. to hand it
    /// to another thread.
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write");
        self.stream.flush().expect("flush");
    }

    /// Sends a masked frame, as every client must.
    pub fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) {
        let frame = encode_masked_frame(opcode, payload, CLIENT_MASK);
        self.send_raw(&frame);
    }

    pub fn send_text(&mut self, text: &str) {
        self.send_frame(Opcode::Text, text.as_bytes());
    }

    /// Blocks until one whole frame has arrived.
    pub fn read_frame(&mut self) -> Frame {
        loop {
            match decode_frame(&self.inbound).expect("server sent a valid frame") {
                FrameDecode::Complete { frame, consumed } => {
                    self.inbound.drain(..consumed);
                    return frame;
                }
                FrameDecode::Incomplete { .. } => self.fill(),
            }
        }
    }

    /// Reads one frame and asserts it is text.
    pub fn read_text(&mut self) -> String {
        let frame = self.read_frame();
        assert_eq!(frame.opcode, Opcode::Text, "expected text, got {frame:?}");
        assert!(frame.fin, "server frames are never fragmented");
        String::from_utf8(frame.payload).expect("text frame is UTF-8")
    }

    /// Reads until the server closes the socket and returns whatever frames
    /// were still in flight.
    pub fn read_until_eof(&mut self) -> Vec<Frame> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.inbound.extend_from_slice(&chunk[..n]),
                // A reset after the server shut down counts as closed.
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => break,
                Err(e) => panic!("expected end of stream, got {e}"),
            }
        }

        let mut frames = Vec::new();
        while let Ok(FrameDecode::Complete { frame, consumed }) = decode_frame(&self.inbound) {
            self.inbound.drain(..consumed);
            frames.push(frame);
        }
        frames
    }

    fn fill(&mut self) {
        let mut chunk = [0u8; 4096];
        let n = self.stream.read(&mut chunk).expect("read");
        assert!(n > 0, "server closed the connection unexpectedly");
        self.inbound.extend_from_slice(&chunk[..n]);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
