//! RFC 6455 frame codec.
//!
//! Wire format of one frame:
//! ```text
//! byte 0:  [FIN:1][RSV1-3:3][opcode:4]
//! byte 1:  [MASK:1][len7:7]
//! then:    [len16:2]  when len7 == 126
//!          [len64:8]  when len7 == 127
//! then:    [mask key:4]  when MASK is set (client → server only)
//! then:    [payload:N]
//! ```
//! All multi-byte integers are big-endian.
//!
//! # Decode outcomes (for beginners)
//!
//! TCP is a byte stream, not a message stream.  One `read()` may return half a
//! frame, exactly one frame, or three and a bit.  [`decode_frame`] therefore
//! has three possible results:
//!
//! - `Ok(FrameDecode::Complete { .. })` – a whole frame was parsed; `consumed`
//!   says how many bytes to drop from the front of the buffer.
//! - `Ok(FrameDecode::Incomplete { .. })` – the buffer ends mid-frame.  This is
//!   the normal state of affairs on a slow link, not an error: keep the bytes
//!   and try again after the next read.
//! - `Err(FrameError)` – the peer broke the protocol.  The connection should be
//!   closed.
//!
//! Frames produced by the server are never masked and never fragmented: FIN is
//! always set.

use thiserror::Error;

/// Largest payload a control frame (close, ping, pong) may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN7_BITS: u8 = 0x7F;
const LEN16_MARKER: u8 = 126;
const LEN64_MARKER: u8 = 127;

/// Errors raised when a received frame violates the protocol.
///
/// A truncated frame is *not* represented here; see [`FrameDecode::Incomplete`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// RSV1-3 were set although no extension was negotiated.
    #[error("reserved bits set without a negotiated extension: 0x{0:02X}")]
    ReservedBitsSet(u8),

    /// The opcode nibble is not one of the values defined by RFC 6455.
    #[error("unknown opcode: 0x{0:X}")]
    UnknownOpcode(u8),

    /// The 64-bit extended length had its most significant bit set.
    #[error("invalid 64-bit payload length: {0}")]
    InvalidLength(u64),

    /// The declared payload exceeds the configured limit.
    #[error("payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { len: u64, max: usize },

    /// A close/ping/pong frame declared more than 125 payload bytes.
    #[error("{opcode:?} control frame declares {len} bytes (max 125)")]
    ControlFrameTooLarge { opcode: Opcode, len: u64 },

    /// A close/ping/pong frame arrived with FIN clear.
    #[error("{0:?} control frame is fragmented")]
    FragmentedControlFrame(Opcode),
}

/// Frame opcodes defined by RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Returns `true` for close, ping, and pong.
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }
}

/// One decoded frame.  The payload is already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// Result of attempting to decode one frame from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameDecode {
    /// A whole frame was parsed from the first `consumed` bytes.
    Complete { frame: Frame, consumed: usize },
    /// The buffer ends mid-frame; at least `needed` more bytes are required
    /// before decoding can make progress.  Nothing was consumed.
    Incomplete { needed: usize },
}

/// All complete frames found at the front of a buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedFrames {
    /// Frames in wire order.
    pub frames: Vec<Frame>,
    /// Bytes covered by `frames`.  Anything after this offset is a partial
    /// frame and must be kept for the next read.
    pub consumed: usize,
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encodes a server → client frame: FIN set, never masked.
///
/// Any payload length encodes; there is no error path.
///
/// # Examples
///
/// ```rust
/// use statedeck_core::{encode_frame, Opcode};
///
/// let bytes = encode_frame(Opcode::Text, b"hi");
/// assert_eq!(bytes, vec![0x81, 0x02, b'h', b'i']);
/// ```
pub fn encode_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10 + payload.len());
    buf.push(FIN_BIT | opcode as u8);
    push_length(&mut buf, payload.len(), 0);
    buf.extend_from_slice(payload);
    buf
}

/// Encodes a client → server frame masked with `mask`.
///
/// Servers never send masked frames; this exists for client-side tooling and
/// tests that need to speak to the server the way a browser does.
pub fn encode_masked_frame(opcode: Opcode, payload: &[u8], mask: [u8; 4]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(14 + payload.len());
    buf.push(FIN_BIT | opcode as u8);
    push_length(&mut buf, payload.len(), MASK_BIT);
    buf.extend_from_slice(&mask);
    let start = buf.len();
    buf.extend_from_slice(payload);
    apply_mask(&mut buf[start..], mask);
    buf
}

/// XORs `payload` in place with the 4-byte `mask`, cycling the key.
///
/// Masking is its own inverse, so the same call masks and unmasks.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

fn push_length(buf: &mut Vec<u8>, len: usize, mask_bit: u8) {
    if len <= MAX_CONTROL_PAYLOAD {
        buf.push(mask_bit | len as u8);
    } else if len <= usize::from(u16::MAX) {
        buf.push(mask_bit | LEN16_MARKER);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(mask_bit | LEN64_MARKER);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decodes one frame from the front of `buf` with no payload size limit.
///
/// # Errors
///
/// Returns [`FrameError`] when the bytes violate the protocol.
pub fn decode_frame(buf: &[u8]) -> Result<FrameDecode, FrameError> {
    decode_frame_limited(buf, usize::MAX)
}

/// Decodes one frame from the front of `buf`, rejecting payloads larger than
/// `max_payload` as soon as the length field is readable.
///
/// # Errors
///
/// Returns [`FrameError`] when the bytes violate the protocol or the declared
/// payload exceeds `max_payload`.
pub fn decode_frame_limited(buf: &[u8], max_payload: usize) -> Result<FrameDecode, FrameError> {
    if buf.len() < 2 {
        return Ok(FrameDecode::Incomplete {
            needed: 2 - buf.len(),
        });
    }

    let first = buf[0];
    let second = buf[1];

    let rsv = first & RSV_BITS;
    if rsv != 0 {
        return Err(FrameError::ReservedBitsSet(rsv));
    }
    let fin = first & FIN_BIT != 0;
    let opcode = Opcode::try_from(first & OPCODE_BITS)?;
    let masked = second & MASK_BIT != 0;

    let (declared, mut offset) = match second & LEN7_BITS {
        LEN16_MARKER => {
            if buf.len() < 4 {
                return Ok(FrameDecode::Incomplete {
                    needed: 4 - buf.len(),
                });
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        LEN64_MARKER => {
            if buf.len() < 10 {
                return Ok(FrameDecode::Incomplete {
                    needed: 10 - buf.len(),
                });
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(raw);
            if len >> 63 != 0 {
                return Err(FrameError::InvalidLength(len));
            }
            (len, 10)
        }
        inline => (u64::from(inline), 2),
    };

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::FragmentedControlFrame(opcode));
        }
        if declared > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::ControlFrameTooLarge {
                opcode,
                len: declared,
            });
        }
    }

    let too_large = FrameError::PayloadTooLarge {
        len: declared,
        max: max_payload,
    };
    let payload_len = usize::try_from(declared).map_err(|_| too_large.clone())?;
    if payload_len > max_payload {
        return Err(too_large);
    }

    let mask = if masked {
        if buf.len() < offset + 4 {
            return Ok(FrameDecode::Incomplete {
                needed: offset + 4 - buf.len(),
            });
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    let total = offset.checked_add(payload_len).ok_or(too_large)?;
    if buf.len() < total {
        return Ok(FrameDecode::Incomplete {
            needed: total - buf.len(),
        });
    }

    let mut payload = buf[offset..total].to_vec();
    if let Some(key) = mask {
        apply_mask(&mut payload, key);
    }

    Ok(FrameDecode::Complete {
        frame: Frame {
            fin,
            opcode,
            payload,
        },
        consumed: total,
    })
}

/// Decodes every complete frame at the front of `buf`.
///
/// Stops at the first partial frame without consuming it.
///
/// # Errors
///
/// Returns the first [`FrameError`] encountered.  Frames decoded before the
/// violation are discarded along with the connection.
///
/// # Examples
///
/// ```rust
/// use statedeck_core::{decode_frames, encode_frame, Opcode};
///
/// let mut bytes = encode_frame(Opcode::Text, b"one");
/// bytes.extend(encode_frame(Opcode::Text, b"two"));
/// bytes.push(0x81); // start of a third frame
///
/// let decoded = decode_frames(&bytes).unwrap();
/// assert_eq!(decoded.frames.len(), 2);
/// assert_eq!(decoded.consumed, bytes.len() - 1);
/// ```
pub fn decode_frames(buf: &[u8]) -> Result<DecodedFrames, FrameError> {
    let mut decoded = DecodedFrames::default();
    while let FrameDecode::Complete { frame, consumed } = decode_frame(&buf[decoded.consumed..])? {
        decoded.frames.push(frame);
        decoded.consumed += consumed;
    }
    Ok(decoded)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
