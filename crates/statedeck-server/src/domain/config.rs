//! Server runtime configuration.
//!
//! [`ServerConfig`] describes one listening instance.  It is built once at
//! startup and cloned into the event loop, so changing a value after
//! `start()` has no effect on a running server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Ports tried in order when the embedding application does not pick one.
pub const DEFAULT_PORTS: [u16; 3] = [42023, 43060, 43020];

/// All runtime settings for one [`WebSocketServer`].
///
/// # Example
///
/// ```rust
/// use statedeck_server::domain::ServerConfig;
///
/// // Port 0 lets the OS choose, which is what tests want.
/// let cfg = ServerConfig::default().with_port(0);
/// assert_eq!(cfg.socket_addr().port(), 0);
/// ```
///
/// [`WebSocketServer`]: crate::infrastructure::WebSocketServer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind.  Loopback by default: subscribers are normally
    /// local overlays and dashboards.
    pub bind_address: IpAddr,

    /// TCP port to listen on.  `0` asks the OS for a free port.
    pub port: u16,

    /// Upper bound on one multiplexer wait.  `stop()` wakes the loop
    /// explicitly, so this only limits how stale the running flag can get.
    pub poll_timeout: Duration,

    /// Bytes requested per `read()` call on a connection.
    pub read_buffer_size: usize,

    /// Largest frame payload accepted from a subscriber.
    pub max_frame_size: usize,

    /// Largest upgrade request head accepted before the blank line.
    pub max_handshake_size: usize,

    /// How long a single frame write may stall on a full socket buffer.
    pub write_timeout: Duration,

    /// Accepted connections beyond this count are dropped immediately.
    pub max_connections: usize,
}

impl ServerConfig {
    /// Returns a copy listening on `port`.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// The address passed to `bind`.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl Default for ServerConfig {
    /// | Field              | Default       |
    /// |--------------------|---------------|
    /// | bind_address       | `127.0.0.1`   |
    /// | port               | `42023`       |
    /// | poll_timeout       | 1 second      |
    /// | read_buffer_size   | 8192          |
    /// | max_frame_size     | 16 MiB        |
    /// | max_handshake_size | 8192          |
    /// | write_timeout      | 5 seconds     |
    /// | max_connections    | 64            |
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORTS[0],
            poll_timeout: Duration::from_millis(1000),
            read_buffer_size: 8192,
            max_frame_size: 16 * 1024 * 1024,
            max_handshake_size: 8192,
            write_timeout: Duration::from_secs(5),
            max_connections: 64,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
