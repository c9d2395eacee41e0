//! Typed commands carried inside the frame envelope.
//!
//! Every command shares the same envelope; only the payload layout differs.
//! Commands are a closed set keyed by the frame `type`:
//!
//! | type     | command | payload                               |
//! |----------|---------|---------------------------------------|
//! | `0x0001` | Ping    | `token:u32`                           |
//! | `0x0002` | Pong    | `token:u32`                           |
//! | `0x0003` | Ack     | `acked_type:u16`                      |
//! | `0x0004` | Nack    | `rejected_type:u16` `code:u8`         |
//! | `0x0005` | Text    | UTF-8 bytes, no terminator            |
//!
//! Multi-byte integers are big-endian, matching the envelope.

use thiserror::Error;

use crate::protocol::frame::{Frame, FrameError};

// ── Command type codes ────────────────────────────────────────────────────────

/// All frame type codes with a typed command representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandType {
    Ping = 0x0001,
    Pong = 0x0002,
    Ack = 0x0003,
    Nack = 0x0004,
    Text = 0x0005,
}

impl TryFrom<u16> for CommandType {
    type Error = CommandError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(CommandType::Ping),
            0x0002 => Ok(CommandType::Pong),
            0x0003 => Ok(CommandType::Ack),
            0x0004 => Ok(CommandType::Nack),
            0x0005 => Ok(CommandType::Text),
            other => Err(CommandError::UnknownType(other)),
        }
    }
}

/// Errors that can occur while converting between frames and commands.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// The frame type has no typed command.
    #[error("unknown command type: 0x{0:04X}")]
    UnknownType(u16),

    /// The payload does not match the layout for its type.
    #[error("malformed {command:?} payload: {reason}")]
    MalformedPayload {
        command: CommandType,
        reason: String,
    },

    /// The encoded command does not fit in a frame.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A typed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Liveness check; the peer answers with [`Command::Pong`] and the same token.
    Ping(u32),
    /// Answer to [`Command::Ping`].
    Pong(u32),
    /// The peer accepted a frame of `acked_type`.
    Ack { acked_type: u16 },
    /// The peer rejected a frame of `rejected_type` with an application code.
    Nack { rejected_type: u16, code: u8 },
    /// Free-form UTF-8 text, e.g. a device log line.
    Text(String),
}

impl Command {
    /// The type code this command is sent under.
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Ping(_) => CommandType::Ping,
            Command::Pong(_) => CommandType::Pong,
            Command::Ack { .. } => CommandType::Ack,
            Command::Nack { .. } => CommandType::Nack,
            Command::Text(_) => CommandType::Text,
        }
    }

    /// Wraps this command in a frame envelope.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Frame`] if a [`Command::Text`] is too long for
    /// a single frame.
    pub fn to_frame(&self) -> Result<Frame, CommandError> {
        let payload = match self {
            Command::Ping(token) | Command::Pong(token) => token.to_be_bytes().to_vec(),
            Command::Ack { acked_type } => acked_type.to_be_bytes().to_vec(),
            Command::Nack {
                rejected_type,
                code,
            } => {
                let mut buf = rejected_type.to_be_bytes().to_vec();
                buf.push(*code);
                buf
            }
            Command::Text(text) => text.as_bytes().to_vec(),
        };
        Ok(Frame::new(self.command_type() as u16, payload)?)
    }
}

impl TryFrom<&Frame> for Command {
    type Error = CommandError;

    fn try_from(frame: &Frame) -> Result<Self, Self::Error> {
        let command = CommandType::try_from(frame.frame_type())?;
        let p = frame.payload();
        match command {
            CommandType::Ping => read_u32(p, command).map(Command::Ping),
            CommandType::Pong => read_u32(p, command).map(Command::Pong),
            CommandType::Ack => {
                require_len(p, 2, command)?;
                Ok(Command::Ack {
                    acked_type: u16::from_be_bytes([p[0], p[1]]),
                })
            }
            CommandType::Nack => {
                require_len(p, 3, command)?;
                Ok(Command::Nack {
                    rejected_type: u16::from_be_bytes([p[0], p[1]]),
                    code: p[2],
                })
            }
            CommandType::Text => String::from_utf8(p.to_vec())
                .map(Command::Text)
                .map_err(|e| CommandError::MalformedPayload {
                    command,
                    reason: format!("invalid UTF-8: {e}"),
                }),
        }
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_len(p: &[u8], exact: usize, command: CommandType) -> Result<(), CommandError> {
    if p.len() != exact {
        return Err(CommandError::MalformedPayload {
            command,
            reason: format!("expected {exact} bytes, got {}", p.len()),
        });
    }
    Ok(())
}

fn read_u32(p: &[u8], command: CommandType) -> Result<u32, CommandError> {
    require_len(p, 4, command)?;
    Ok(u32::from_be_bytes([p[0], p[1], p[2], p[3]]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
