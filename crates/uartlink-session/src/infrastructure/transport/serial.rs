//! Real UART transport backed by the `serialport` crate.
//!
//! # Timeouts
//!
//! The reader handle blocks for the read timeout and the cloned writer handle
//! gets the write timeout.  On Windows a cloned handle shares one set of comm
//! timeouts with the original, so the writer keeps the read timeout there:
//! stop latency stays bounded by the read timeout, and a write gives up after
//! the read timeout instead of the write timeout.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info};

use super::{PortSettings, Transport, TransportError, TransportOpener};

/// Opens OS serial devices.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortOpener;

impl TransportOpener for SerialPortOpener {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, TransportError> {
        let port = serialport::new(settings.port.as_str(), settings.baud_rate)
            .timeout(settings.read_timeout)
            .open()?;
        info!(
            port = %settings.port,
            baud_rate = settings.baud_rate,
            "serial port opened"
        );
        Ok(Box::new(SerialTransport {
            name: settings.port.clone(),
            port: Some(port),
            write_timeout: settings.write_timeout,
        }))
    }
}

/// One handle onto an open serial device.
pub struct SerialTransport {
    name: String,
    /// `None` once closed.
    port: Option<Box<dyn SerialPort>>,
    write_timeout: Duration,
}

impl SerialTransport {
    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.port_mut()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => match TransportError::from_io(e) {
                TransportError::Timeout => Ok(0),
                other => Err(other),
            },
        }
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        Ok(self.port_mut()?.bytes_to_read()? as usize)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port_mut()?;
        port.write_all(bytes).map_err(TransportError::from_io)?;
        port.flush().map_err(TransportError::from_io)
    }

    fn try_clone_writer(&self) -> Result<Box<dyn Transport>, TransportError> {
        let port = self.port.as_ref().ok_or(TransportError::Closed)?;
        let mut clone = port.try_clone()?;
        if let Some(timeout) = writer_timeout(self.write_timeout) {
            clone.set_timeout(timeout)?;
        }
        Ok(Box::new(SerialTransport {
            name: self.name.clone(),
            port: Some(clone),
            write_timeout: self.write_timeout,
        }))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.name, "serial handle closed");
        }
    }
}

/// Timeout to set on a cloned writer handle, or `None` where the clone
/// shares its timeouts with the reader handle.
fn writer_timeout(write_timeout: Duration) -> Option<Duration> {
    if cfg!(windows) {
        None
    } else {
        Some(write_timeout)
    }
}
