//! Byte transports a session can run over.
//!
//! # Why a trait? (for beginners)
//!
//! The session only needs four things from a serial port: read whatever
//! bytes have arrived, ask how many more are waiting, write a buffer, and
//! produce a second handle for writing so the read thread and writers never
//! share one.  Putting those behind [`Transport`] lets the same session code
//! run over a real UART ([`serial::SerialPortOpener`]) or over the
//! in-memory [`mock::MockLink`] in tests, with no hardware attached.

pub mod mock;
pub mod serial;

use std::time::Duration;

use thiserror::Error;

use crate::application::sink::WriteErrorKind;

/// Everything needed to open a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSettings {
    /// OS device name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    pub baud_rate: u32,
    /// How long a single read may block before returning zero bytes.
    pub read_timeout: Duration,
    /// How long a write may block before failing with [`TransportError::Timeout`].
    pub write_timeout: Duration,
}

/// Errors reported by a [`Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The operation did not finish within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The handle was closed, locally or by the session.
    #[error("transport is closed")]
    Closed,

    /// The operating system reported an I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial driver could not open or configure the device.
    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),
}

impl TransportError {
    /// Classification handed to [`crate::EventSink::on_write_error`].
    pub fn kind(&self) -> WriteErrorKind {
        match self {
            TransportError::Timeout => WriteErrorKind::Timeout,
            TransportError::Closed => WriteErrorKind::Closed,
            TransportError::Io(_) => WriteErrorKind::Io,
            TransportError::Port(_) => WriteErrorKind::Other,
        }
    }

    /// Maps an I/O error, turning the timeout kinds into [`TransportError::Timeout`].
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        if is_timeout_error(&e) {
            TransportError::Timeout
        } else {
            TransportError::Io(e)
        }
    }
}

/// An open, bidirectional byte channel.
pub trait Transport: Send {
    /// Reads up to `buf.len()` bytes.  Returns `Ok(0)` when the read timeout
    /// elapses with nothing received; that is not an error.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Number of bytes that can be read right now without blocking.
    fn bytes_available(&mut self) -> Result<usize, TransportError>;

    /// Writes all of `bytes` or fails.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Opens a second handle onto the same device, used for writing.
    fn try_clone_writer(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Releases the handle.  Further calls fail with [`TransportError::Closed`].
    fn close(&mut self);
}

/// Opens transports; the seam between the session and the device layer.
pub trait TransportOpener {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, TransportError>;
}

fn is_timeout_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}
