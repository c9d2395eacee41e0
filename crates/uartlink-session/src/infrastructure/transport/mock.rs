//! In-memory transport for tests.
//!
//! # Why a mock link?
//!
//! A real serial port needs hardware (or a virtual null-modem pair) and
//! cannot be observed directly from test code.  [`MockLink`] stands in for
//! the wire: tests push inbound bytes with [`MockLink::feed`], inspect what
//! the session wrote with [`MockLink::written`], and inject failures.
//!
//! Every handle opened from the same link shares its state through an
//! `Arc<Mutex<..>>`, exactly like a read handle and its cloned write handle
//! share one device.
//!
//! # Usage in tests
//!
//! ```ignore
//! let link = MockLink::new();
//! let session = SerialPortSession::start(settings, &link.opener(), sink)?;
//!
//! link.feed(&encode_packet(&frame));
//! session.write(b"hello");
//! assert_eq!(link.written(), b"hello");
//! ```

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{PortSettings, Transport, TransportError, TransportOpener};

/// Largest chunk a single mock `read` returns, so that multi-read draining
/// gets exercised.
const MAX_READ_CHUNK: usize = 4;

/// Simulated wait when no inbound bytes are pending.
const IDLE_READ_DELAY: Duration = Duration::from_millis(2);

#[derive(Debug, Default)]
struct LinkState {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    write_failure: Option<io::ErrorKind>,
    read_failure: Option<io::ErrorKind>,
    fail_open: bool,
    opened_with: Option<PortSettings>,
    open_handles: usize,
    closes: usize,
}

/// The shared, simulated wire.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<LinkState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues bytes for the session to read.
    pub fn feed(&self, bytes: &[u8]) {
        self.state().inbound.extend(bytes.iter().copied());
    }

    /// Everything written through any handle so far.
    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    /// Number of queued inbound bytes not yet read.
    pub fn pending_inbound(&self) -> usize {
        self.state().inbound.len()
    }

    /// Makes every subsequent write fail with `kind` (`None` restores writes).
    /// `TimedOut` surfaces as [`TransportError::Timeout`].
    pub fn set_write_failure(&self, kind: Option<io::ErrorKind>) {
        self.state().write_failure = kind;
    }

    /// Makes every subsequent read fail, as if the device was unplugged.
    pub fn disconnect(&self) {
        self.state().read_failure = Some(io::ErrorKind::BrokenPipe);
    }

    /// Makes the next `open` fail.
    pub fn set_fail_open(&self, fail: bool) {
        self.state().fail_open = fail;
    }

    /// Settings passed to the most recent successful `open`.
    pub fn opened_with(&self) -> Option<PortSettings> {
        self.state().opened_with.clone()
    }

    /// Handles opened (including clones) and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.state().open_handles
    }

    /// Number of `close` calls on live handles.
    pub fn closes(&self) -> usize {
        self.state().closes
    }

    /// An opener whose transports run over this link.
    pub fn opener(&self) -> MockOpener {
        MockOpener { link: self.clone() }
    }

    fn new_handle(&self) -> MockTransport {
        self.state().open_handles += 1;
        MockTransport {
            link: self.clone(),
            closed: false,
        }
    }
}

/// Opens [`MockTransport`]s on a [`MockLink`].
#[derive(Debug, Clone)]
pub struct MockOpener {
    link: MockLink,
}

impl TransportOpener for MockOpener {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, TransportError> {
        {
            let mut state = self.link.state();
            if state.fail_open {
                return Err(TransportError::Port(serialport::Error::new(
                    serialport::ErrorKind::NoDevice,
                    format!("mock device {} unavailable", settings.port),
                )));
            }
            state.opened_with = Some(settings.clone());
        }
        Ok(Box::new(self.link.new_handle()))
    }
}

/// One handle onto a [`MockLink`].
#[derive(Debug)]
pub struct MockTransport {
    link: MockLink,
    closed: bool,
}

impl MockTransport {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let n = {
            let mut state = self.link.state();
            if let Some(kind) = state.read_failure {
                return Err(TransportError::Io(io::Error::new(kind, "mock read failure")));
            }
            let n = buf.len().min(MAX_READ_CHUNK).min(state.inbound.len());
            for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                *slot = byte;
            }
            n
        };
        if n == 0 {
            std::thread::sleep(IDLE_READ_DELAY);
        }
        Ok(n)
    }

    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        self.ensure_open()?;
        Ok(self.link.state().inbound.len())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut state = self.link.state();
        if let Some(kind) = state.write_failure {
            return Err(TransportError::from_io(io::Error::new(
                kind,
                "mock write failure",
            )));
        }
        state.written.extend_from_slice(bytes);
        Ok(())
    }

    fn try_clone_writer(&self) -> Result<Box<dyn Transport>, TransportError> {
        self.ensure_open()?;
        Ok(Box::new(self.link.new_handle()))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.link.state();
            state.open_handles -= 1;
            state.closes += 1;
        }
    }
}
