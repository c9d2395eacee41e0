//! Codec for the fixed frame envelope carried inside every packet.
//!
//! Envelope format:
//! ```text
//! [type:2][length:2][payload:length]
//! ```
//! Total header size: 4 bytes. All multi-byte integers are big-endian.
//!
//! The envelope knows nothing about start tokens, escaping or CRCs; those
//! belong to [`crate::protocol::wire`].  Keeping the two apart means the
//! reader can validate integrity first and only then interpret the bytes.

use thiserror::Error;

use crate::protocol::wire::{CRC_LEN, SIZE_HEADER_LEN};

/// Size of the `[type][length]` header that precedes every payload.
pub const ENVELOPE_HEADER_LEN: usize = 4;

/// Largest payload whose packet still fits the 2-byte SIZE header.
///
/// SIZE counts the envelope header, the payload and the CRC trailer, so the
/// payload gets whatever is left of `u16::MAX` after the other two.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize - ENVELOPE_HEADER_LEN - CRC_LEN;

/// Largest packet body (everything after SIZE) before byte stuffing.
pub const MAX_PACKET_BODY_LEN: usize = u16::MAX as usize;

const _: () = assert!(SIZE_HEADER_LEN == 2, "SIZE header must stay 2 bytes wide");

/// Errors raised when constructing a [`Frame`] from application data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The payload would not fit in a single packet.
    #[error("payload too large: {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}

/// Errors that can occur while decoding an envelope.
///
/// These are only ever seen for bytes that already passed the CRC check, so
/// in normal operation they indicate a sender bug rather than line noise.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Fewer bytes than the 4-byte envelope header.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The `length` field does not match the number of bytes that follow it.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The declared payload could never have been framed by a conforming sender.
    #[error("payload too large: {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge { len: usize, max: usize },
}

/// A decoded application frame: a command type and its payload.
///
/// Frames are immutable once built.  Construct one with [`Frame::new`] (or
/// [`Frame::empty`]) on the sending side; the reader builds them through
/// [`parse_frame`] after the CRC has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Frame {
    frame_type: u16,
    payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame with the given type and payload.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] if `payload` is longer than
    /// [`MAX_PAYLOAD_LEN`].
    pub fn new(frame_type: u16, payload: impl Into<Vec<u8>>) -> Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        Ok(Self {
            frame_type,
            payload,
        })
    }

    /// Creates a frame with no payload.
    pub fn empty(frame_type: u16) -> Self {
        Self {
            frame_type,
            payload: Vec::new(),
        }
    }

    /// The command type identifier.
    pub fn frame_type(&self) -> u16 {
        self.frame_type
    }

    /// The payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the frame and returns its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Length of the serialized envelope (header + payload).
    pub fn envelope_len(&self) -> usize {
        ENVELOPE_HEADER_LEN + self.payload.len()
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Decodes an envelope from `bytes`.
///
/// The whole slice must be exactly one envelope: the `length` field has to
/// match the number of bytes after the header, no more and no less.
///
/// # Errors
///
/// Returns [`ParseError`] if the bytes are malformed.  Never panics.
///
/// # Examples
///
/// ```rust
/// use uartlink_core::{parse_frame, serialize_frame, Frame};
///
/// let frame = Frame::new(0x0010, vec![1, 2, 3]).unwrap();
/// let bytes = serialize_frame(&frame);
/// assert_eq!(parse_frame(&bytes).unwrap(), frame);
/// ```
pub fn parse_frame(bytes: &[u8]) -> Result<Frame, ParseError> {
    if bytes.len() < ENVELOPE_HEADER_LEN {
        return Err(ParseError::InsufficientData {
            needed: ENVELOPE_HEADER_LEN,
            available: bytes.len(),
        });
    }

    let frame_type = u16::from_be_bytes([bytes[0], bytes[1]]);
    let declared = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    let available = bytes.len() - ENVELOPE_HEADER_LEN;

    if declared != available {
        return Err(ParseError::PayloadLengthMismatch {
            declared,
            available,
        });
    }
    if declared > MAX_PAYLOAD_LEN {
        return Err(ParseError::PayloadTooLarge {
            len: declared,
            max: MAX_PAYLOAD_LEN,
        });
    }

    Ok(Frame {
        frame_type,
        payload: bytes[ENVELOPE_HEADER_LEN..].to_vec(),
    })
}

/// Encodes `frame` into its envelope bytes.
///
/// This is the exact inverse of [`parse_frame`] and cannot fail: every
/// [`Frame`] already satisfies the payload length limit.
pub fn serialize_frame(frame: &Frame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(frame.envelope_len());
    buf.extend_from_slice(&frame.frame_type.to_be_bytes());
    // Cannot truncate: payload.len() <= MAX_PAYLOAD_LEN < u16::MAX.
    buf.extend_from_slice(&(frame.payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(&frame.payload);
    buf
}

// ── Tests ─────────────────────────────────────────────────────────────────────
