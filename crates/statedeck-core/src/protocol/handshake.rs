//! HTTP/1.1 → WebSocket upgrade handshake.
//!
//! A WebSocket connection starts life as a plain HTTP request:
//!
//! ```text
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! The server proves it understood the request by hashing the client's key
//! together with a fixed GUID and answering with `101 Switching Protocols`.
//! From then on both sides speak frames (see [`super::frame`]).
//!
//! Everything here is a pure function over bytes and strings; the event loop
//! owns the socket and decides when to call them.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Fixed GUID appended to the client key before hashing (RFC 6455 §1.3).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Errors that prevent a connection from being upgraded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The request head is not valid UTF-8 text.
    #[error("upgrade request is not valid UTF-8")]
    NotUtf8,

    /// The first line is not `METHOD TARGET HTTP/x.y`.
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),

    /// Only `GET` may be upgraded.
    #[error("unsupported method for upgrade: {0}")]
    UnsupportedMethod(String),

    /// A header line has no `:` separator.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// The `Sec-WebSocket-Key` header is absent or empty.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    /// The request head is longer than the configured limit.
    #[error("upgrade request exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },
}

/// The parts of an upgrade request the server cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request target, e.g. `/` or `/live?topic=all`.
    pub target: String,
    /// Value of the `Sec-WebSocket-Key` header, trimmed.
    pub key: String,
}

/// Result of trying to parse an upgrade request from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeParse {
    /// The request head was complete; `consumed` bytes (including the blank
    /// line) belong to it.  Anything after that is already frame data.
    Complete {
        request: UpgradeRequest,
        consumed: usize,
    },
    /// The blank line ending the request head has not arrived yet.
    Incomplete,
}

/// Parses the HTTP upgrade request at the front of `buf`.
///
/// Header names are matched case-insensitively.
///
/// # Errors
///
/// Returns [`HandshakeError`] when the head is complete but is not a well-formed
/// `GET` request carrying a `Sec-WebSocket-Key`.
///
/// # Examples
///
/// ```rust
/// use statedeck_core::{parse_upgrade_request, HandshakeParse};
///
/// let raw = b"GET / HTTP/1.1\r\nsec-websocket-key: abc==\r\n\r\n";
/// match parse_upgrade_request(raw).unwrap() {
///     HandshakeParse::Complete { request, consumed } => {
///         assert_eq!(request.key, "abc==");
///         assert_eq!(consumed, raw.len());
///     }
///     HandshakeParse::Incomplete => unreachable!(),
/// }
/// ```
pub fn parse_upgrade_request(buf: &[u8]) -> Result<HandshakeParse, HandshakeError> {
    let Some(head_end) = find_terminator(buf) else {
        return Ok(HandshakeParse::Incomplete);
    };
    let consumed = head_end + HEADER_TERMINATOR.len();
    let head = std::str::from_utf8(&buf[..head_end]).map_err(|_| HandshakeError::NotUtf8)?;

    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let target = parse_request_line(request_line)?;

    let mut key = None;
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HandshakeError::MalformedHeader(line.to_string()))?;
        if name.trim().eq_ignore_ascii_case("sec-websocket-key") {
            key = Some(value.trim().to_string());
        }
    }

    let key = key
        .filter(|k| !k.is_empty())
        .ok_or(HandshakeError::MissingKey)?;

    Ok(HandshakeParse::Complete {
        request: UpgradeRequest { target, key },
        consumed,
    })
}

/// Computes `base64(SHA-1(key ++ GUID))`, the `Sec-WebSocket-Accept` value.
///
/// # Examples
///
/// ```rust
/// use statedeck_core::accept_token;
///
/// // The sample nonce from RFC 6455 §1.3.
/// assert_eq!(
///     accept_token("dGhlIHNhbXBsZSBub25jZQ=="),
///     "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
/// );
/// ```
pub fn accept_token(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Builds the literal `101 Switching Protocols` response for `key`.
pub fn upgrade_response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_token(key)
    )
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

/// Validates `GET <target> HTTP/<version>` and returns the target.
fn parse_request_line(line: &str) -> Result<String, HandshakeError> {
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(HandshakeError::MalformedRequestLine(line.to_string()));
    };

    if !version.starts_with("HTTP/") {
        return Err(HandshakeError::MalformedRequestLine(line.to_string()));
    }
    if method != "GET" {
        return Err(HandshakeError::UnsupportedMethod(method.to_string()));
    }
    Ok(target.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
