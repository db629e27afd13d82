//! # statedeck-core
//!
//! Shared library for StateDeck containing the WebSocket wire codec, the
//! HTTP upgrade handshake, and the JSON message envelope exchanged with
//! subscribers.
//!
//! This crate is used by the server crate and by tests that play the role of
//! a client.  It has zero dependencies on sockets, threads, or async runtimes:
//! every function here is a pure transform over bytes or values.
//!
//! # Architecture overview (for beginners)
//!
//! StateDeck pushes live state out of a running process to any number of
//! subscriber clients (dashboards, stream decks, overlays) over WebSocket.
//!
//! - **`protocol`** – How bytes travel over the network.  `frame` encodes and
//!   decodes RFC 6455 frames; `handshake` turns the client's HTTP upgrade
//!   request into the `101 Switching Protocols` response.
//!
//! - **`domain`** – What the bytes mean.  `messages` defines the JSON control
//!   messages a subscriber may send and the payloads the server publishes;
//!   `cache` remembers what was last published so unchanged state is not
//!   re-sent.

pub mod domain;
pub mod protocol;

pub use domain::cache::PayloadCache;
pub use domain::messages::{ControlMessage, FeatureSummary, OutboundMessage, StatePayload};
pub use protocol::frame::{
    decode_frame, decode_frames, encode_frame, DecodedFrames, Frame, FrameDecode, FrameError,
    Opcode,
};
pub use protocol::handshake::{
    accept_token, parse_upgrade_request, upgrade_response, HandshakeError, HandshakeParse,
    UpgradeRequest,
};
