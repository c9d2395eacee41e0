//! Protocol module containing the frame envelope, wire encoding and reader.

pub mod commands;
pub mod frame;
pub mod reader;
pub mod wire;

pub use commands::{Command, CommandError};
pub use frame::{parse_frame, serialize_frame, Frame, FrameError, ParseError};
pub use reader::{ByteStreamReader, FrameHandler, Noise, NoiseKind, ReaderEvent};
pub use wire::*;
