//! A running serial link: one transport, one reader thread, one sink.
//!
//! # Threads (for beginners)
//!
//! [`SerialPortSession::start`] opens the port twice (the second handle is a
//! clone of the first) and spawns a dedicated OS thread named
//! `uartlink-reader`.  That thread owns the read handle and the
//! [`ByteStreamReader`], so parser state is never shared and never locked.
//! The write handle sits behind a `Mutex` so that any thread may call
//! [`SerialPortSession::write`].
//!
//! The read loop blocks on the port for at most the configured read timeout,
//! then checks the `running` flag.  That timeout therefore bounds how long
//! [`SerialPortSession::stop`] waits for the thread to finish.
//!
//! # Shutdown
//!
//! The session ends because `stop()` was called, because a read failed (for
//! example, the USB adapter was unplugged), or because a write failed.  In
//! every case both handles are closed and the sink sees
//! `on_connection_closed` exactly once, from the reader thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use thiserror::Error;
use tracing::{debug, error, info, warn};
use uartlink_core::{encode_packet, ByteStreamReader, Command, CommandError, Frame, FrameHandler, Noise};

use crate::application::sink::{EventSink, WriteErrorKind};
use crate::infrastructure::transport::serial::SerialPortOpener;
use crate::infrastructure::transport::{PortSettings, Transport, TransportError, TransportOpener};

/// Name given to every session's read thread.
pub const READER_THREAD_NAME: &str = "uartlink-reader";

/// Size of the scratch buffer for one transport read.
const READ_BUF_LEN: usize = 1024;

/// Errors returned when a session cannot be started.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The port could not be opened, or its write handle could not be cloned.
    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: TransportError,
    },

    /// The OS refused to create the reader thread.
    #[error("failed to spawn reader thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// State shared by the session handle and its reader thread.
struct Shared {
    port: String,
    running: AtomicBool,
    closed: AtomicBool,
    writer: Mutex<Option<Box<dyn Transport>>>,
    sink: Arc<dyn EventSink>,
}

impl Shared {
    fn writer(&self) -> MutexGuard<'_, Option<Box<dyn Transport>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close_writer(&self) {
        if let Some(mut writer) = self.writer().take() {
            writer.close();
        }
    }

    /// Clears `running` and closes the write handle without joining, so it
    /// is safe on any thread.  The reader thread notices within one read
    /// timeout, closes its own handle and fires `on_connection_closed`.
    fn begin_shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.close_writer();
    }

    /// Fires `on_connection_closed` the first time only.
    fn notify_closed(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(port = %self.port, "session closed");
            self.sink.on_connection_closed();
        }
    }
}

/// A live connection to one serial device.
///
/// Dropping the session stops it.
pub struct SerialPortSession {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SerialPortSession {
    /// Opens the OS serial device described by `settings`.
    ///
    /// # Errors
    ///
    /// See [`SerialPortSession::start`].
    pub fn open(settings: &PortSettings, sink: Arc<dyn EventSink>) -> Result<Self, SessionError> {
        Self::start(settings, &SerialPortOpener, sink)
    }

    /// Opens a transport through `opener` and starts the reader thread.
    ///
    /// No sink callback fires when this returns an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Open`] if the transport cannot be opened or
    /// cloned, and [`SessionError::Spawn`] if the thread cannot be created.
    pub fn start(
        settings: &PortSettings,
        opener: &dyn TransportOpener,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, SessionError> {
        let open_err = |source| SessionError::Open {
            port: settings.port.clone(),
            source,
        };

        let mut transport = opener.open(settings).map_err(open_err)?;
        let writer = match transport.try_clone_writer() {
            Ok(writer) => writer,
            Err(e) => {
                transport.close();
                return Err(open_err(e));
            }
        };

        let shared = Arc::new(Shared {
            port: settings.port.clone(),
            running: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            writer: Mutex::new(Some(writer)),
            sink,
        });

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(READER_THREAD_NAME.to_string())
            .spawn(move || read_loop(transport, thread_shared))
            .map_err(|e| {
                // The closure (and the read handle in it) was dropped.
                shared.close_writer();
                SessionError::Spawn(e)
            })?;

        info!(
            port = %settings.port,
            baud_rate = settings.baud_rate,
            "session started"
        );
        Ok(Self {
            shared,
            reader: Mutex::new(Some(handle)),
        })
    }

    /// Device name this session was opened on.
    pub fn port(&self) -> &str {
        &self.shared.port
    }

    /// `false` once `stop()` was called or the link failed.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire) && !self.shared.closed.load(Ordering::Acquire)
    }

    /// Writes raw bytes.  The outcome is reported to the sink, never returned;
    /// failed writes are not retried.
    ///
    /// A transport failure (timeout or I/O error) ends the session after
    /// `on_write_error` has been reported.
    pub fn write(&self, bytes: &[u8]) {
        // The guard is released before any sink callback runs.
        let result = match self.shared.writer().as_mut() {
            Some(writer) => writer.write_all(bytes),
            None => Err(TransportError::Closed),
        };

        match result {
            Ok(()) => self.shared.sink.on_write_success(bytes),
            Err(e) => {
                let kind = e.kind();
                if kind == WriteErrorKind::Closed {
                    debug!(port = %self.shared.port, "write on a stopped session");
                    self.shared.sink.on_write_error(kind, &e.to_string());
                } else {
                    warn!(port = %self.shared.port, %kind, "write failed, closing session: {e}");
                    self.shared.sink.on_write_error(kind, &e.to_string());
                    self.shared.begin_shutdown();
                }
            }
        }
    }

    /// Encodes `frame` into a packet and writes it.
    pub fn write_frame(&self, frame: &Frame) {
        self.write(&encode_packet(frame));
    }

    /// Encodes `command` into a packet and writes it.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the command does not fit in a frame;
    /// nothing is written in that case.
    pub fn send_command(&self, command: &Command) -> Result<(), CommandError> {
        let frame = command.to_frame()?;
        self.write_frame(&frame);
        Ok(())
    }

    /// Stops the reader thread and closes the port.  Idempotent.
    ///
    /// When called from inside a sink callback (that is, on the reader thread
    /// itself) the thread is not joined; it exits as soon as the callback
    /// returns.
    pub fn stop(&self) {
        self.shared.begin_shutdown();

        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!(port = %self.shared.port, "reader thread panicked");
                // The thread never reached its own close notification.
                self.shared.notify_closed();
            }
        }
    }
}

impl Drop for SerialPortSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SerialPortSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPortSession")
            .field("port", &self.shared.port)
            .field("running", &self.is_running())
            .finish()
    }
}

// ── Reader thread ─────────────────────────────────────────────────────────────

/// Adapts the sink onto the reader's callback seam.
struct SinkHandler<'a> {
    sink: &'a dyn EventSink,
}

impl FrameHandler for SinkHandler<'_> {
    fn on_frame(&mut self, frame: Frame) {
        self.sink.on_frame(frame);
    }

    fn on_noise(&mut self, noise: Noise) {
        self.sink.on_noise(noise.kind(), &noise.to_string());
    }
}

/// The main receive loop executed on the reader thread.
fn read_loop(mut transport: Box<dyn Transport>, shared: Arc<Shared>) {
    let mut reader = ByteStreamReader::new(SinkHandler {
        sink: &*shared.sink,
    });
    let mut buf = vec![0u8; READ_BUF_LEN];

    while shared.running.load(Ordering::Acquire) {
        if let Err(e) = pump(transport.as_mut(), &mut reader, &mut buf, &shared.running) {
            if shared.running.load(Ordering::Acquire) {
                error!(port = %shared.port, "serial read failed, closing session: {e}");
            }
            break;
        }
    }

    shared.running.store(false, Ordering::Release);
    transport.close();
    shared.close_writer();
    shared.notify_closed();
}

/// One blocking read, then drain whatever else is already waiting.
fn pump<H: FrameHandler>(
    transport: &mut dyn Transport,
    reader: &mut ByteStreamReader<H>,
    buf: &mut [u8],
    running: &AtomicBool,
) -> Result<(), TransportError> {
    let n = match transport.read(buf) {
        Ok(n) => n,
        Err(TransportError::Timeout) => return Ok(()),
        Err(e) => return Err(e),
    };
    if n == 0 {
        return Ok(());
    }
    reader.add_slice(&buf[..n]);

    while running.load(Ordering::Acquire) && transport.bytes_available()? > 0 {
        let n = transport.read(buf)?;
        if n == 0 {
            break;
        }
        reader.add_slice(&buf[..n]);
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
