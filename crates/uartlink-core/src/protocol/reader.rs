//! Resynchronizing frame reader.
//!
//! [`ByteStreamReader`] consumes raw bytes one at a time, in arrival order,
//! and reports each outcome to a [`FrameHandler`]:
//!
//! - a fully validated [`Frame`] via [`FrameHandler::on_frame`], or
//! - a [`Noise`] diagnostic via [`FrameHandler::on_noise`].
//!
//! # How resynchronization works (for beginners)
//!
//! The reader starts *unsynchronized* and throws bytes away until it sees
//! [`START_TOKEN`].  From then on it collects bytes (undoing byte stuffing as
//! it goes) until the SIZE header says the packet is complete, checks the
//! CRC and emits the frame.  Any problem along the way – a corrupted CRC, an
//! illegal escape, a packet that is too short – resets the reader back to the
//! unsynchronized state, so the next start token is always a clean slate.
//!
//! ```text
//!            START                  SIZE bytes read
//!  Unsynced ───────►  Reading size ───────────────►  Reading body
//!     ▲                     │ size == 0                   │ complete
//!     └─────────────────────┴─────────────────────────────┘
//!                     reset (frame or diagnostic)
//! ```
//!
//! The reader never blocks, never allocates per byte beyond its buffer, and
//! never panics on any input.
//!
//! # Threading
//!
//! The reader has no interior locking.  It must be driven from a single
//! thread; in the session crate that is the dedicated read-loop thread.

use thiserror::Error;
use tracing::{debug, trace};

use crate::protocol::frame::{parse_frame, Frame, ENVELOPE_HEADER_LEN};
use crate::protocol::wire::{
    crc16_ccitt, is_control_byte, BIT_FLIP_MASK, CRC_LEN, ESCAPE_TOKEN, SIZE_HEADER_LEN,
    START_TOKEN,
};

// ── Diagnostics ───────────────────────────────────────────────────────────────

/// Category of a link-noise diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoiseKind {
    /// A control token appeared right after [`ESCAPE_TOKEN`].
    SpecialByteAfterEscape,
    /// A start token arrived while a packet was still being read.
    MultipleStartTokens,
    /// The declared SIZE is too small to hold an envelope and a CRC.
    BufferTooSmall,
    /// The CRC trailer does not match the received envelope.
    CrcMismatch,
}

impl NoiseKind {
    /// Stable snake_case name, suitable for log fields and metrics keys.
    pub fn as_str(self) -> &'static str {
        match self {
            NoiseKind::SpecialByteAfterEscape => "special_byte_after_escape",
            NoiseKind::MultipleStartTokens => "multiple_start_tokens",
            NoiseKind::BufferTooSmall => "buffer_too_small",
            NoiseKind::CrcMismatch => "crc_mismatch",
        }
    }
}

impl std::fmt::Display for NoiseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal diagnostic describing why a candidate packet was dropped.
///
/// Noise is expected on a real serial line; the reader recovers from every
/// variant by resetting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Noise {
    #[error("control byte 0x{byte:02X} cannot follow an escape token")]
    SpecialByteAfterEscape { byte: u8 },

    #[error("start token while synchronized; discarded {discarded} buffered byte(s)")]
    MultipleStartTokens { discarded: usize },

    #[error("packet of {len} byte(s) is smaller than the {min}-byte minimum")]
    BufferTooSmall { len: usize, min: usize },

    #[error("crc mismatch: computed 0x{computed:04X}, received 0x{received:04X}")]
    CrcMismatch { computed: u16, received: u16 },
}

impl Noise {
    /// The category of this diagnostic.
    pub fn kind(&self) -> NoiseKind {
        match self {
            Noise::SpecialByteAfterEscape { .. } => NoiseKind::SpecialByteAfterEscape,
            Noise::MultipleStartTokens { .. } => NoiseKind::MultipleStartTokens,
            Noise::BufferTooSmall { .. } => NoiseKind::BufferTooSmall,
            Noise::CrcMismatch { .. } => NoiseKind::CrcMismatch,
        }
    }
}

// ── Handler seam ──────────────────────────────────────────────────────────────

/// Receives everything the reader produces.
///
/// Callbacks run synchronously inside [`ByteStreamReader::add`]; a slow
/// handler stalls the reader.
pub trait FrameHandler {
    /// A CRC-validated frame was decoded.
    fn on_frame(&mut self, frame: Frame);
    /// A candidate packet was dropped.
    fn on_noise(&mut self, noise: Noise);
}

/// One reader outcome, for handlers that simply record what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    Frame(Frame),
    Noise(Noise),
}

impl FrameHandler for Vec<ReaderEvent> {
    fn on_frame(&mut self, frame: Frame) {
        self.push(ReaderEvent::Frame(frame));
    }

    fn on_noise(&mut self, noise: Noise) {
        self.push(ReaderEvent::Noise(noise));
    }
}

impl<H: FrameHandler + ?Sized> FrameHandler for &mut H {
    fn on_frame(&mut self, frame: Frame) {
        (**self).on_frame(frame);
    }

    fn on_noise(&mut self, noise: Noise) {
        (**self).on_noise(noise);
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Smallest SIZE that can hold an envelope header and a CRC.
const MIN_PACKET_LEN: usize = ENVELOPE_HEADER_LEN + CRC_LEN;

/// The resynchronizing framing state machine.
///
/// # Examples
///
/// ```rust
/// use uartlink_core::{encode_packet, ByteStreamReader, Frame, ReaderEvent};
///
/// let frame = Frame::new(0x0001, vec![0x7E, 0x00, 0x7D]).unwrap();
/// let mut reader = ByteStreamReader::new(Vec::new());
/// reader.add_slice(&encode_packet(&frame));
/// assert_eq!(reader.into_handler(), vec![ReaderEvent::Frame(frame)]);
/// ```
#[derive(Debug)]
pub struct ByteStreamReader<H> {
    handler: H,
    buffer: Vec<u8>,
    escaping_next: bool,
    synchronized: bool,
    /// Bytes still expected after the SIZE header; `0` means "not yet known".
    size_to_read: u16,
}

impl<H: FrameHandler> ByteStreamReader<H> {
    /// Creates an unsynchronized reader that reports to `handler`.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            buffer: Vec::new(),
            escaping_next: false,
            synchronized: false,
            size_to_read: 0,
        }
    }

    /// Feeds one raw byte from the link.
    pub fn add(&mut self, byte: u8) {
        if self.escaping_next && is_control_byte(byte) {
            self.reset();
            self.handler.on_noise(Noise::SpecialByteAfterEscape { byte });
            return;
        }

        if byte == START_TOKEN {
            if self.synchronized {
                let discarded = self.buffer.len();
                self.handler
                    .on_noise(Noise::MultipleStartTokens { discarded });
            }
            self.reset();
            self.synchronized = true;
            return;
        }

        if !self.synchronized {
            return;
        }

        if byte == ESCAPE_TOKEN {
            self.escaping_next = true;
            return;
        }

        let byte = if self.escaping_next {
            self.escaping_next = false;
            byte ^ BIT_FLIP_MASK
        } else {
            byte
        };

        self.buffer.push(byte);

        if self.size_to_read == 0 {
            if self.buffer.len() == SIZE_HEADER_LEN {
                let size = u16::from_be_bytes([self.buffer[0], self.buffer[1]]);
                if size == 0 {
                    debug!("zero-length size header, resynchronizing");
                    self.reset();
                    return;
                }
                trace!(size, "size header received");
                self.size_to_read = size;
                self.buffer.clear();
            }
        } else if self.buffer.len() >= self.size_to_read as usize {
            let packet = std::mem::take(&mut self.buffer);
            self.process(&packet);
            self.reset();
        }
    }

    /// Feeds a chunk of raw bytes, in order.
    pub fn add_slice(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.add(b);
        }
    }

    /// Validates a complete packet body and emits the frame it carries.
    fn process(&mut self, packet: &[u8]) {
        if packet.len() < MIN_PACKET_LEN {
            self.handler.on_noise(Noise::BufferTooSmall {
                len: packet.len(),
                min: MIN_PACKET_LEN,
            });
            return;
        }

        let (base, trailer) = packet.split_at(packet.len() - CRC_LEN);
        let received = u16::from_be_bytes([trailer[0], trailer[1]]);
        let computed = crc16_ccitt(base);
        if computed != received {
            self.handler
                .on_noise(Noise::CrcMismatch { computed, received });
            return;
        }

        match parse_frame(base) {
            Ok(frame) => {
                trace!(
                    frame_type = frame.frame_type(),
                    len = frame.payload().len(),
                    "frame decoded"
                );
                self.handler.on_frame(frame);
            }
            // CRC-valid but structurally wrong: a sender bug, not line noise.
            Err(e) => debug!("dropping malformed envelope: {e}"),
        }
    }

    /// Returns the reader to the unsynchronized state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.escaping_next = false;
        self.synchronized = false;
        self.size_to_read = 0;
    }

    /// `true` between a start token and the end of the packet it opened.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// `true` if the previous byte was an escape token.
    pub fn is_escaping(&self) -> bool {
        self.escaping_next
    }

    /// Number of unstuffed bytes collected for the current packet.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Declared SIZE of the packet being read, or `0` if not yet known.
    pub fn size_to_read(&self) -> u16 {
        self.size_to_read
    }

    /// Shared access to the handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Exclusive access to the handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Consumes the reader and returns its handler.
    pub fn into_handler(self) -> H {
        self.handler
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::serialize_frame;
    use crate::protocol::wire::{encode_packet, stuff_into};

    fn new_reader() -> ByteStreamReader<Vec<ReaderEvent>> {
        ByteStreamReader::new(Vec::new())
    }

    fn assert_idle(reader: &ByteStreamReader<Vec<ReaderEvent>>) {
        assert!(!reader.is_synchronized(), "reader must not be synchronized");
        assert!(!reader.is_escaping(), "reader must not be escaping");
        assert_eq!(reader.buffered_len(), 0, "buffer must be empty");
        assert_eq!(reader.size_to_read(), 0, "size must be unknown");
    }

    /// Builds a stuffed packet, letting `corrupt` tamper with the unstuffed
    /// SIZE + envelope + CRC bytes first.
    fn tampered_packet(
        frame_type: u16,
        payload: &[u8],
        corrupt: impl FnOnce(&mut Vec<u8>),
    ) -> Vec<u8> {
        let envelope = serialize_frame(&Frame::new(frame_type, payload.to_vec()).unwrap());
        let crc = crc16_ccitt(&envelope);
        let mut body = ((envelope.len() + CRC_LEN) as u16).to_be_bytes().to_vec();
        body.extend_from_slice(&envelope);
        body.extend_from_slice(&crc.to_be_bytes());
        corrupt(&mut body);

        let mut bytes = vec![START_TOKEN];
        stuff_into(&body, &mut bytes);
        bytes
    }

    // ── Happy path ────────────────────────────────────────────────────────────

    #[test]
    fn test_reader_decodes_single_frame() {
        // Arrange
        let frame = Frame::new(0x0042, vec![1, 2, 3, 4]).unwrap();
        let mut reader = new_reader();

        // Act
        reader.add_slice(&encode_packet(&frame));

        // Assert
        assert_eq!(reader.handler(), &vec![ReaderEvent::Frame(frame)]);
        assert_idle(&reader);
    }

    #[test]
    fn test_reader_decodes_back_to_back_frames_in_order() {
        // Arrange
        let frames: Vec<Frame> = (0..5u16)
            .map(|i| Frame::new(i, vec![i as u8; i as usize]).unwrap())
            .collect();
        let stream: Vec<u8> = frames.iter().flat_map(encode_packet).collect();
        let mut reader = new_reader();

        // Act
        reader.add_slice(&stream);

        // Assert
        let expected: Vec<ReaderEvent> = frames.into_iter().map(ReaderEvent::Frame).collect();
        assert_eq!(reader.into_handler(), expected);
    }

    #[test]
    fn test_reader_unescapes_control_bytes_in_payload() {
        // Arrange
        let payload = vec![START_TOKEN, 0x00, ESCAPE_TOKEN, START_TOKEN ^ BIT_FLIP_MASK];
        let frame = Frame::new(0x7E7D, payload.clone()).unwrap();
        let mut reader = new_reader();

        // Act
        reader.add_slice(&encode_packet(&frame));

        // Assert
        match reader.handler().as_slice() {
            [ReaderEvent::Frame(f)] => {
                assert_eq!(f.frame_type(), 0x7E7D);
                assert_eq!(f.payload(), payload.as_slice());
            }
            other => panic!("expected one frame, got {other:?}"),
        }
    }

    #[test]
    fn test_reader_ignores_bytes_before_first_start_token() {
        let frame = Frame::empty(0x0001);
        let mut stream = vec![0x00, 0x06, 0xFF, ESCAPE_TOKEN, 0x12];
        stream.extend(encode_packet(&frame));

        let mut reader = new_reader();
        reader.add_slice(&stream);

        assert_eq!(reader.into_handler(), vec![ReaderEvent::Frame(frame)]);
    }

    // ── Scenarios ─────────────────────────────────────────────────────────────

    #[test]
    fn test_zero_length_payload_frame_is_delivered() {
        // Arrange – type=7, length=0, CRC computed over the 4-byte envelope.
        let envelope = [0x00, 0x07, 0x00, 0x00];
        let crc = crc16_ccitt(&envelope);
        let mut bytes = vec![START_TOKEN, 0x00, 0x06];
        bytes.extend_from_slice(&envelope);
        stuff_into(&crc.to_be_bytes(), &mut bytes);
        let mut reader = new_reader();

        // Act – one byte at a time
        for b in bytes {
            reader.add(b);
        }

        // Assert
        assert_eq!(
            reader.into_handler(),
            vec![ReaderEvent::Frame(Frame::empty(7))]
        );
    }

    #[test]
    fn test_corrupted_crc_yields_one_mismatch_and_no_frame() {
        // Arrange – same zero-length frame, last CRC byte incremented
        let bytes = tampered_packet(7, &[], |body| {
            let last = body.len() - 1;
            body[last] = body[last].wrapping_add(1);
        });
        let mut reader = new_reader();

        // Act
        for &b in &bytes {
            reader.add(b);
        }

        // Assert
        let events = reader.handler();
        assert_eq!(events.len(), 1, "exactly one event expected: {events:?}");
        assert!(matches!(
            events[0],
            ReaderEvent::Noise(Noise::CrcMismatch { .. })
        ));
        assert_idle(&reader);
    }

    #[test]
    fn test_control_byte_after_escape_is_rejected() {
        // Arrange
        let mut reader = new_reader();
        reader.add(START_TOKEN);

        // Act
        reader.add(ESCAPE_TOKEN);
        reader.add(START_TOKEN);

        // Assert
        assert_eq!(
            reader.handler(),
            &vec![ReaderEvent::Noise(Noise::SpecialByteAfterEscape {
                byte: START_TOKEN
            })]
        );
        assert!(!reader.is_synchronized());
        assert_idle(&reader);
    }

    #[test]
    fn test_escape_followed_by_escape_is_rejected() {
        let mut reader = new_reader();
        reader.add_slice(&[START_TOKEN, 0x00, ESCAPE_TOKEN, ESCAPE_TOKEN]);

        assert_eq!(reader.handler().len(), 1);
        assert_eq!(
            reader.handler()[0],
            ReaderEvent::Noise(Noise::SpecialByteAfterEscape {
                byte: ESCAPE_TOKEN
            })
        );
        assert_idle(&reader);
    }

    #[test]
    fn test_zero_size_header_resets_silently() {
        // Arrange
        let mut reader = new_reader();

        // Act
        reader.add_slice(&[START_TOKEN, 0x00, 0x00]);

        // Assert
        assert!(reader.handler().is_empty(), "no frame and no diagnostic");
        assert_idle(&reader);
    }

    #[test]
    fn test_zero_size_header_does_not_swallow_next_frame() {
        let frame = Frame::new(0x0003, vec![0xAB]).unwrap();
        let mut stream = vec![START_TOKEN, 0x00, 0x00];
        stream.extend(encode_packet(&frame));

        let mut reader = new_reader();
        reader.add_slice(&stream);

        assert_eq!(reader.into_handler(), vec![ReaderEvent::Frame(frame)]);
    }

    // ── Noise taxonomy ────────────────────────────────────────────────────────

    #[test]
    fn test_resynchronization_after_garbage_and_duplicate_start() {
        // Arrange
        let frame = Frame::new(0x0010, b"ok".to_vec()).unwrap();
        let mut stream = vec![0x01, 0x02, 0x03];
        stream.push(START_TOKEN);
        stream.extend_from_slice(&[0x00, 0x30, 0x44]);
        stream.extend(encode_packet(&frame));
        let mut reader = new_reader();

        // Act
        reader.add_slice(&stream);

        // Assert
        let events = reader.into_handler();
        assert_eq!(events.len(), 2, "{events:?}");
        assert_eq!(
            events[0],
            ReaderEvent::Noise(Noise::MultipleStartTokens { discarded: 1 })
        );
        assert_eq!(events[1], ReaderEvent::Frame(frame));
    }

    #[test]
    fn test_size_smaller_than_envelope_and_crc_is_too_small() {
        // Arrange – SIZE = 3, then three body bytes
        let mut reader = new_reader();

        // Act
        reader.add_slice(&[START_TOKEN, 0x00, 0x03, 0x01, 0x02, 0x03]);

        // Assert
        assert_eq!(
            reader.handler(),
            &vec![ReaderEvent::Noise(Noise::BufferTooSmall { len: 3, min: 6 })]
        );
        assert_idle(&reader);
    }

    #[test]
    fn test_crc_valid_but_malformed_envelope_emits_nothing() {
        // Arrange – envelope declares 5 payload bytes but carries 1
        let envelope = [0x00, 0x01, 0x00, 0x05, 0xAA];
        let crc = crc16_ccitt(&envelope);
        let mut stream = vec![START_TOKEN];
        stuff_into(&((envelope.len() + CRC_LEN) as u16).to_be_bytes(), &mut stream);
        stuff_into(&envelope, &mut stream);
        stuff_into(&crc.to_be_bytes(), &mut stream);
        let mut reader = new_reader();

        // Act
        reader.add_slice(&stream);

        // Assert
        assert!(reader.handler().is_empty());
        assert_idle(&reader);
    }

    #[test]
    fn test_every_single_bit_flip_in_base_or_crc_is_caught() {
        let payload = [0x10, 0x20, 0x30];
        // Envelope (4 + 3) plus CRC (2), after the 2-byte SIZE header.
        let region = SIZE_HEADER_LEN..SIZE_HEADER_LEN + ENVELOPE_HEADER_LEN + payload.len() + CRC_LEN;

        for pos in region {
            for bit in 0..8 {
                // Arrange
                let stream = tampered_packet(0x0101, &payload, |body| body[pos] ^= 1 << bit);
                let mut reader = new_reader();

                // Act
                reader.add_slice(&stream);

                // Assert
                let events = reader.into_handler();
                assert_eq!(events.len(), 1, "pos {pos} bit {bit}: {events:?}");
                assert!(
                    matches!(events[0], ReaderEvent::Noise(Noise::CrcMismatch { .. })),
                    "pos {pos} bit {bit}: {events:?}"
                );
            }
        }
    }

    #[test]
    fn test_reader_recovers_after_every_diagnostic() {
        // Arrange – one of each diagnostic, each followed by a valid frame
        let frame = Frame::new(0x0020, vec![0x01]).unwrap();
        let good = encode_packet(&frame);
        let bad_crc = tampered_packet(0x0020, &[0x01], |body| {
            let last = body.len() - 1;
            body[last] ^= 0x01;
        });
        let prefixes: Vec<Vec<u8>> = vec![
            vec![START_TOKEN, ESCAPE_TOKEN, START_TOKEN],
            vec![START_TOKEN, 0x00],
            vec![START_TOKEN, 0x00, 0x01, 0x00],
            bad_crc,
        ];

        for prefix in prefixes {
            let mut reader = new_reader();

            // Act
            reader.add_slice(&prefix);
            reader.add_slice(&good);

            // Assert
            let events = reader.into_handler();
            assert_eq!(
                events.last(),
                Some(&ReaderEvent::Frame(frame.clone())),
                "prefix must not poison the next frame: {events:?}"
            );
        }
    }

    #[test]
    fn test_noise_kind_names_are_stable() {
        assert_eq!(
            Noise::SpecialByteAfterEscape { byte: 0x7E }.kind().as_str(),
            "special_byte_after_escape"
        );
        assert_eq!(
            Noise::MultipleStartTokens { discarded: 0 }.kind().to_string(),
            "multiple_start_tokens"
        );
        assert_eq!(
            Noise::BufferTooSmall { len: 1, min: 6 }.kind().as_str(),
            "buffer_too_small"
        );
        assert_eq!(
            Noise::CrcMismatch {
                computed: 1,
                received: 2
            }
            .kind()
            .as_str(),
            "crc_mismatch"
        );
    }

    #[test]
    fn test_crc_mismatch_display_includes_both_values() {
        let noise = Noise::CrcMismatch {
            computed: 0xBEEF,
            received: 0x1234,
        };
        let text = noise.to_string();
        assert!(text.contains("0xBEEF"), "{text}");
        assert!(text.contains("0x1234"), "{text}");
    }
}
