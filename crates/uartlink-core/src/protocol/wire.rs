//! On-wire packet layout, byte stuffing and the CRC16 trailer.
//!
//! Packet format:
//! ```text
//! [START:1][SIZE:2][type:2][length:2][payload:length][crc:2]
//!          └──────────────── byte-stuffed ─────────────────┘
//! ```
//!
//! `SIZE` counts every (unstuffed) byte after itself up to and including the
//! CRC.  The CRC16-CCITT covers the envelope only, i.e. everything between
//! `SIZE` and the trailer.  All multi-byte integers are big-endian.
//!
//! # Byte stuffing (for beginners)
//!
//! The receiver finds packet boundaries by looking for [`START_TOKEN`].  If a
//! payload byte happened to equal `START_TOKEN` the receiver would think a new
//! packet started in the middle of the old one.  To prevent that, the sender
//! replaces every reserved byte after the start token with two bytes:
//! [`ESCAPE_TOKEN`] followed by the original value XOR [`BIT_FLIP_MASK`].
//! The receiver reverses the substitution before interpreting anything.
//!
//! ```text
//! 0x7E  ->  0x7D 0x5E
//! 0x7D  ->  0x7D 0x5D
//! ```

use crate::protocol::frame::{serialize_frame, Frame};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Reserved byte that begins every packet.
pub const START_TOKEN: u8 = 0x7E;

/// Reserved byte announcing that the next byte is stuffed.
pub const ESCAPE_TOKEN: u8 = 0x7D;

/// Mask XORed onto a stuffed byte to recover its real value.
pub const BIT_FLIP_MASK: u8 = 0x20;

/// Width of the SIZE header that follows the start token.
pub const SIZE_HEADER_LEN: usize = 2;

/// Width of the CRC16 trailer.
pub const CRC_LEN: usize = 2;

/// Returns `true` for the bytes that must never appear unescaped inside a packet.
pub fn is_control_byte(byte: u8) -> bool {
    byte == START_TOKEN || byte == ESCAPE_TOKEN
}

// ── CRC ───────────────────────────────────────────────────────────────────────

/// CRC16-CCITT (poly 0x1021, init 0xFFFF, no reflection, no final XOR).
///
/// This is the parameterisation commonly labelled CCITT-FALSE; its check
/// value over `b"123456789"` is `0x29B1`.
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Appends `raw` to `out`, escaping every reserved byte.
pub fn stuff_into(raw: &[u8], out: &mut Vec<u8>) {
    for &b in raw {
        if is_control_byte(b) {
            out.push(ESCAPE_TOKEN);
            out.push(b ^ BIT_FLIP_MASK);
        } else {
            out.push(b);
        }
    }
}

/// Builds the complete on-wire byte sequence for `frame`.
///
/// The result starts with [`START_TOKEN`] and is ready to be written to the
/// transport as-is.
///
/// # Examples
///
/// ```rust
/// use uartlink_core::protocol::wire::{encode_packet, START_TOKEN};
/// use uartlink_core::Frame;
///
/// let bytes = encode_packet(&Frame::empty(7));
/// assert_eq!(bytes[0], START_TOKEN);
/// // SIZE = 4-byte envelope + 2-byte CRC
/// assert_eq!(&bytes[1..3], &[0x00, 0x06]);
/// ```
pub fn encode_packet(frame: &Frame) -> Vec<u8> {
    let body = serialize_frame(frame);
    let crc = crc16_ccitt(&body);
    // Cannot truncate: envelope_len() + CRC_LEN <= MAX_PACKET_BODY_LEN.
    let size = (body.len() + CRC_LEN) as u16;

    // Worst case every byte after START is escaped.
    let mut out = Vec::with_capacity(1 + 2 * (SIZE_HEADER_LEN + body.len() + CRC_LEN));
    out.push(START_TOKEN);
    stuff_into(&size.to_be_bytes(), &mut out);
    stuff_into(&body, &mut out);
    stuff_into(&crc.to_be_bytes(), &mut out);
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
