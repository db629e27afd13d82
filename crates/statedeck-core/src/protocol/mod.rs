//! Protocol module containing the RFC 6455 frame codec and the upgrade handshake.

pub mod frame;
pub mod handshake;

pub use frame::{decode_frame, decode_frames, encode_frame, Frame, FrameDecode, FrameError, Opcode};
pub use handshake::{accept_token, parse_upgrade_request, upgrade_response, HandshakeError};
