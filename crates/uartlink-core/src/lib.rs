//! # uartlink-core
//!
//! Shared library for the uartlink serial protocol: the frame envelope codec,
//! the byte-stuffed wire encoding with its CRC16 trailer, and the
//! resynchronizing reader that turns a noisy byte stream back into frames.
//!
//! This crate has zero dependencies on serial ports, threads, or OS APIs.
//! Everything here is pure byte manipulation, which keeps it testable on any
//! host.
//!
//! # Architecture overview (for beginners)
//!
//! A UART link is just a stream of octets.  There is no notion of "message
//! boundaries" at the hardware level, bytes can be lost or corrupted, and the
//! receiver may start listening half-way through a transmission.  The
//! protocol solves this in layers:
//!
//! - **`protocol::frame`** – The envelope: `{type, length, payload}`.  This
//!   is what the application cares about.
//!
//! - **`protocol::wire`** – How an envelope travels on the wire.  A start
//!   token marks the beginning of a packet, a size header says how many bytes
//!   follow, a CRC16 trailer detects corruption, and *byte stuffing* makes
//!   sure the start token never appears inside a packet by accident.
//!
//! - **`protocol::reader`** – The receiving state machine.  It scans for the
//!   start token, undoes the byte stuffing, checks the CRC and hands back
//!   validated frames.  Anything malformed is reported as *noise* and the
//!   reader simply waits for the next start token.
//!
//! - **`protocol::commands`** – A small closed set of typed commands built on
//!   top of the envelope.

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `uartlink_core::Frame` instead of `uartlink_core::protocol::frame::Frame`.
pub use protocol::commands::{Command, CommandError};
pub use protocol::frame::{parse_frame, serialize_frame, Frame, FrameError, ParseError};
pub use protocol::reader::{ByteStreamReader, FrameHandler, Noise, NoiseKind, ReaderEvent};
pub use protocol::wire::{crc16_ccitt, encode_packet};
