//! Link-health counters.
//!
//! [`StatsSink`] wraps another [`EventSink`], counts every event that passes
//! through it, and then forwards the event unchanged.  A link that delivers
//! frames but also shows a steadily climbing `crc_mismatch` count is usually
//! a cabling or baud-rate problem.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use uartlink_core::{Frame, NoiseKind};

use super::sink::{EventSink, WriteErrorKind};

/// Lock-free counters, shared between the read thread and any observer.
#[derive(Debug, Default)]
pub struct LinkStats {
    frames: AtomicU64,
    payload_bytes: AtomicU64,
    special_byte_after_escape: AtomicU64,
    multiple_start_tokens: AtomicU64,
    buffer_too_small: AtomicU64,
    crc_mismatch: AtomicU64,
    writes_succeeded: AtomicU64,
    bytes_written: AtomicU64,
    writes_failed: AtomicU64,
    closed: AtomicBool,
}

/// A point-in-time copy of [`LinkStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatsSnapshot {
    pub frames: u64,
    pub payload_bytes: u64,
    pub special_byte_after_escape: u64,
    pub multiple_start_tokens: u64,
    pub buffer_too_small: u64,
    pub crc_mismatch: u64,
    pub writes_succeeded: u64,
    pub bytes_written: u64,
    pub writes_failed: u64,
    pub closed: bool,
}

impl LinkStatsSnapshot {
    /// Total number of noise diagnostics of every kind.
    pub fn noise_total(&self) -> u64 {
        self.special_byte_after_escape
            + self.multiple_start_tokens
            + self.buffer_too_small
            + self.crc_mismatch
    }
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads every counter.  Counters are read individually, so a snapshot
    /// taken while the link is busy may be off by the events in flight.
    pub fn snapshot(&self) -> LinkStatsSnapshot {
        LinkStatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            payload_bytes: self.payload_bytes.load(Ordering::Relaxed),
            special_byte_after_escape: self.special_byte_after_escape.load(Ordering::Relaxed),
            multiple_start_tokens: self.multiple_start_tokens.load(Ordering::Relaxed),
            buffer_too_small: self.buffer_too_small.load(Ordering::Relaxed),
            crc_mismatch: self.crc_mismatch.load(Ordering::Relaxed),
            writes_succeeded: self.writes_succeeded.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Acquire),
        }
    }

    fn noise_counter(&self, kind: NoiseKind) -> &AtomicU64 {
        match kind {
            NoiseKind::SpecialByteAfterEscape => &self.special_byte_after_escape,
            NoiseKind::MultipleStartTokens => &self.multiple_start_tokens,
            NoiseKind::BufferTooSmall => &self.buffer_too_small,
            NoiseKind::CrcMismatch => &self.crc_mismatch,
        }
    }
}

/// Counts events into a [`LinkStats`] before forwarding them to `inner`.
pub struct StatsSink<S> {
    inner: S,
    stats: Arc<LinkStats>,
}

impl<S: EventSink> StatsSink<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            stats: Arc::new(LinkStats::new()),
        }
    }

    /// Shared handle to the counters; stays valid after the sink is dropped.
    pub fn stats(&self) -> Arc<LinkStats> {
        Arc::clone(&self.stats)
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: EventSink> EventSink for StatsSink<S> {
    fn on_frame(&self, frame: Frame) {
        self.stats.frames.fetch_add(1, Ordering::Relaxed);
        self.stats
            .payload_bytes
            .fetch_add(frame.payload().len() as u64, Ordering::Relaxed);
        self.inner.on_frame(frame);
    }

    fn on_noise(&self, kind: NoiseKind, detail: &str) {
        self.stats.noise_counter(kind).fetch_add(1, Ordering::Relaxed);
        self.inner.on_noise(kind, detail);
    }

    fn on_connection_closed(&self) {
        self.stats.closed.store(true, Ordering::Release);
        self.inner.on_connection_closed();
    }

    fn on_write_success(&self, bytes: &[u8]) {
        self.stats.writes_succeeded.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_written
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        self.inner.on_write_success(bytes);
    }

    fn on_write_error(&self, kind: WriteErrorKind, detail: &str) {
        self.stats.writes_failed.fetch_add(1, Ordering::Relaxed);
        self.inner.on_write_error(kind, detail);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
