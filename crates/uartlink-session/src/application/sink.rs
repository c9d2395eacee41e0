//! The `EventSink` contract and the stock sinks.
//!
//! A session reports exactly three kinds of outcome to its sink: a delivered
//! frame, a transient noise diagnostic (the session keeps running), or the
//! terminal connection-closed notification.  Write results are reported to
//! the same sink so that callers of the fire-and-forget write path can still
//! observe failures.
//!
//! # Threading
//!
//! `on_frame`, `on_noise` and (usually) `on_connection_closed` run on the
//! session's read thread.  `on_write_success` / `on_write_error` run on
//! whichever thread called `write`.  Sinks must therefore be `Send + Sync`,
//! and a slow sink stalls frame processing: offload heavy work, for example
//! through [`ChannelSink`].

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uartlink_core::{Frame, NoiseKind};

/// Why an outbound write did not reach the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteErrorKind {
    /// The write did not complete within the configured write timeout.
    Timeout,
    /// The operating system reported an I/O error.
    Io,
    /// Any other transport failure.
    Other,
    /// The session was already stopped.
    Closed,
}

impl std::fmt::Display for WriteErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WriteErrorKind::Timeout => "timeout",
            WriteErrorKind::Io => "io",
            WriteErrorKind::Other => "other",
            WriteErrorKind::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Receives everything a [`crate::SerialPortSession`] produces.
///
/// All callbacks are synchronous and fire-and-forget: they cannot fail and
/// their return value is ignored.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    /// A CRC-validated frame was decoded.
    fn on_frame(&self, frame: Frame);
    /// A candidate packet was dropped as line noise.
    fn on_noise(&self, kind: NoiseKind, detail: &str);
    /// The session ended; no further frames will be delivered.
    fn on_connection_closed(&self);
    /// `bytes` were handed to the transport in full.
    fn on_write_success(&self, bytes: &[u8]);
    /// An outbound write failed; it is not retried.
    fn on_write_error(&self, kind: WriteErrorKind, detail: &str);
}

// ── TracingSink ───────────────────────────────────────────────────────────────

/// Logs every event through `tracing`.
///
/// Frames are logged at `info`, noise at `warn`, write failures at `error`.
#[derive(Debug, Clone)]
pub struct TracingSink {
    port: String,
}

impl TracingSink {
    /// Creates a sink whose log lines are tagged with `port`.
    pub fn new(port: impl Into<String>) -> Self {
        Self { port: port.into() }
    }
}

impl EventSink for TracingSink {
    fn on_frame(&self, frame: Frame) {
        info!(
            port = %self.port,
            frame_type = format_args!("0x{:04X}", frame.frame_type()),
            len = frame.payload().len(),
            "frame received"
        );
    }

    fn on_noise(&self, kind: NoiseKind, detail: &str) {
        warn!(port = %self.port, %kind, "link noise: {detail}");
    }

    fn on_connection_closed(&self) {
        info!(port = %self.port, "connection closed");
    }

    fn on_write_success(&self, bytes: &[u8]) {
        debug!(port = %self.port, len = bytes.len(), "write complete");
    }

    fn on_write_error(&self, kind: WriteErrorKind, detail: &str) {
        error!(port = %self.port, %kind, "write failed: {detail}");
    }
}

// ── ChannelSink ───────────────────────────────────────────────────────────────

/// A session outcome, as delivered by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Frame(Frame),
    Noise { kind: NoiseKind, detail: String },
    WriteSucceeded { len: usize },
    WriteFailed { kind: WriteErrorKind, detail: String },
    ConnectionClosed,
}

/// Forwards every event onto an unbounded Tokio channel.
///
/// The channel is unbounded so that the read thread never blocks on a slow
/// consumer and so that `write` may be called from inside an async task
/// without tripping Tokio's "blocking inside a runtime" check.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelSink {
    /// Creates a sink together with the receiver for its events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            // Receiver dropped – the consumer is shutting down.
            debug!("session event dropped: receiver closed");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_frame(&self, frame: Frame) {
        self.send(SessionEvent::Frame(frame));
    }

    fn on_noise(&self, kind: NoiseKind, detail: &str) {
        self.send(SessionEvent::Noise {
            kind,
            detail: detail.to_string(),
        });
    }

    fn on_connection_closed(&self) {
        self.send(SessionEvent::ConnectionClosed);
    }

    fn on_write_success(&self, bytes: &[u8]) {
        self.send(SessionEvent::WriteSucceeded { len: bytes.len() });
    }

    fn on_write_error(&self, kind: WriteErrorKind, detail: &str) {
        self.send(SessionEvent::WriteFailed {
            kind,
            detail: detail.to_string(),
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
