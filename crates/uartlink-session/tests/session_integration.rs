//! Integration tests: a full session over the in-memory link.
//!
//! Each test starts a real `SerialPortSession` (real reader thread, real
//! parser) on a `MockLink`, feeds wire bytes in, and observes what reaches
//! the sink through a `ChannelSink`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use uartlink_core::protocol::wire::{ESCAPE_TOKEN, START_TOKEN};
use uartlink_core::{encode_packet, Command, Frame, NoiseKind};
use uartlink_session::infrastructure::transport::mock::MockLink;
use uartlink_session::{
    ChannelSink, EventSink, PortSettings, SerialPortSession, SessionEvent, StatsSink,
    WriteErrorKind,
};

const WAIT: Duration = Duration::from_secs(2);

// ── Helpers ───────────────────────────────────────────────────────────────────

fn settings() -> PortSettings {
    PortSettings {
        port: "loopback".to_string(),
        baud_rate: 115_200,
        read_timeout: Duration::from_millis(10),
        write_timeout: Duration::from_millis(10),
    }
}

fn start(link: &MockLink) -> (SerialPortSession, UnboundedReceiver<SessionEvent>) {
    let (sink, rx) = ChannelSink::new();
    let session = SerialPortSession::start(&settings(), &link.opener(), Arc::new(sink))
        .expect("mock session starts");
    (session, rx)
}

async fn next_event(rx: &mut UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("event within timeout")
        .expect("channel open")
}

async fn next_frame(rx: &mut UnboundedReceiver<SessionEvent>) -> Frame {
    match next_event(rx).await {
        SessionEvent::Frame(frame) => frame,
        other => panic!("expected a frame, got {other:?}"),
    }
}

// ── Inbound ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_frames_arrive_in_wire_order() {
    // Arrange
    let link = MockLink::new();
    let (session, mut rx) = start(&link);
    let frames: Vec<Frame> = (0u16..5)
        .map(|i| Frame::new(0x0100 + i, vec![i as u8; i as usize * 3]).unwrap())
        .collect();

    // Act
    let stream: Vec<u8> = frames.iter().flat_map(encode_packet).collect();
    link.feed(&stream);

    // Assert
    for expected in &frames {
        assert_eq!(&next_frame(&mut rx).await, expected);
    }
    session.stop();
}

#[tokio::test]
async fn test_payload_full_of_control_bytes_survives() {
    // Arrange
    let link = MockLink::new();
    let (session, mut rx) = start(&link);
    let payload: Vec<u8> = [START_TOKEN, ESCAPE_TOKEN, 0x00, START_TOKEN, START_TOKEN, ESCAPE_TOKEN]
        .repeat(20);
    let frame = Frame::new(START_TOKEN as u16, payload).unwrap();

    // Act
    link.feed(&encode_packet(&frame));

    // Assert
    assert_eq!(next_frame(&mut rx).await, frame);
    session.stop();
}

#[tokio::test]
async fn test_line_noise_before_packet_is_skipped() {
    // Arrange
    let link = MockLink::new();
    let (session, mut rx) = start(&link);
    let frame = Command::Text("boot ok".to_string()).to_frame().unwrap();

    // Act – garbage before the first START is ignored while unsynchronized
    link.feed(&[0x00, 0xFF, 0x13, 0x37]);
    link.feed(&encode_packet(&frame));

    // Assert
    assert_eq!(next_frame(&mut rx).await, frame);
    session.stop();
}

#[tokio::test]
async fn test_truncated_packet_reports_noise_then_recovers() {
    // Arrange
    let link = MockLink::new();
    let (session, mut rx) = start(&link);
    let lost = encode_packet(&Frame::new(1, vec![1, 2, 3, 4]).unwrap());
    let good = Frame::new(2, vec![5, 6]).unwrap();

    // Act – the first packet is cut off mid-body by the next START
    link.feed(&lost[..lost.len() - 3]);
    link.feed(&encode_packet(&good));

    // Assert
    match next_event(&mut rx).await {
        SessionEvent::Noise { kind, .. } => assert_eq!(kind, NoiseKind::MultipleStartTokens),
        other => panic!("expected noise, got {other:?}"),
    }
    assert_eq!(next_frame(&mut rx).await, good);
    session.stop();
}

#[tokio::test]
async fn test_corrupted_crc_reports_mismatch_and_no_frame() {
    // Arrange
    let link = MockLink::new();
    let (session, mut rx) = start(&link);
    let mut packet = encode_packet(&Frame::empty(7));
    let last = packet.len() - 1;
    packet[last] = packet[last].wrapping_add(1);
    let after = Frame::empty(8);

    // Act
    link.feed(&packet);
    link.feed(&encode_packet(&after));

    // Assert
    match next_event(&mut rx).await {
        SessionEvent::Noise { kind, detail } => {
            assert_eq!(kind, NoiseKind::CrcMismatch);
            assert!(!detail.is_empty());
        }
        other => panic!("expected noise, got {other:?}"),
    }
    assert_eq!(next_frame(&mut rx).await, after);
    session.stop();
}

// ── Outbound ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_outbound_packet_decodes_on_the_other_side() {
    // Arrange – two links, the second one replays what the first wrote
    let a = MockLink::new();
    let b = MockLink::new();
    let (sender, mut sender_rx) = start(&a);
    let (receiver, mut receiver_rx) = start(&b);
    let command = Command::Nack {
        rejected_type: 0x0042,
        code: 3,
    };

    // Act
    sender.send_command(&command).unwrap();
    assert!(matches!(
        next_event(&mut sender_rx).await,
        SessionEvent::WriteSucceeded { .. }
    ));
    b.feed(&a.written());

    // Assert
    let frame = next_frame(&mut receiver_rx).await;
    assert_eq!(Command::try_from(&frame), Ok(command));
    sender.stop();
    receiver.stop();
}

#[tokio::test]
async fn test_concurrent_writers_never_interleave_packets() {
    // Arrange
    let link = MockLink::new();
    let (session, _rx) = start(&link);
    let session = Arc::new(session);
    let frames: Vec<Frame> = (0u16..8)
        .map(|i| Frame::new(i, vec![i as u8; 64]).unwrap())
        .collect();

    // Act
    let handles: Vec<_> = frames
        .iter()
        .cloned()
        .map(|frame| {
            let session = Arc::clone(&session);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    session.write_frame(&frame);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // Assert – replaying the combined output yields 80 intact frames
    let replay = MockLink::new();
    let (checker, mut rx) = start(&replay);
    replay.feed(&link.written());
    for _ in 0..80 {
        let frame = next_frame(&mut rx).await;
        assert!(frames.contains(&frame));
    }
    checker.stop();
    session.stop();
}

// ── Lifecycle ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_emits_single_close_and_rejects_writes() {
    // Arrange
    let link = MockLink::new();
    let (session, mut rx) = start(&link);

    // Act
    session.stop();
    session.write(b"too late");
    session.stop();
    drop(session);

    // Assert
    assert_eq!(next_event(&mut rx).await, SessionEvent::ConnectionClosed);
    match next_event(&mut rx).await {
        SessionEvent::WriteFailed { kind, .. } => assert_eq!(kind, WriteErrorKind::Closed),
        other => panic!("expected write failure, got {other:?}"),
    }
    assert!(rx.recv().await.is_none(), "sink dropped after the session");
    assert_eq!(link.open_handles(), 0);
}

#[tokio::test]
async fn test_unplugged_device_closes_session() {
    // Arrange
    let link = MockLink::new();
    let (session, mut rx) = start(&link);

    // Act
    link.disconnect();

    // Assert
    assert_eq!(next_event(&mut rx).await, SessionEvent::ConnectionClosed);
    assert!(!session.is_running());
    assert_eq!(link.open_handles(), 0);
}

#[tokio::test]
async fn test_write_failure_ends_session() {
    // Arrange
    let link = MockLink::new();
    let (session, mut rx) = start(&link);
    link.set_write_failure(Some(std::io::ErrorKind::BrokenPipe));

    // Act
    session.write(b"x");

    // Assert – the failure is reported first, then the link closes
    match next_event(&mut rx).await {
        SessionEvent::WriteFailed { kind, .. } => assert_eq!(kind, WriteErrorKind::Io),
        other => panic!("expected write failure, got {other:?}"),
    }
    assert_eq!(next_event(&mut rx).await, SessionEvent::ConnectionClosed);
    assert!(!session.is_running());
    assert_eq!(link.open_handles(), 0);

    session.stop();
    drop(session);
    assert!(rx.recv().await.is_none(), "no events after the close");
}

#[tokio::test]
async fn test_stats_sink_counts_a_noisy_stream() {
    // Arrange
    let link = MockLink::new();
    let (channel, mut rx) = ChannelSink::new();
    let sink = StatsSink::new(channel);
    let stats = sink.stats();
    let session = SerialPortSession::start(&settings(), &link.opener(), Arc::new(sink)).unwrap();

    let mut bad = encode_packet(&Frame::empty(1));
    let last = bad.len() - 1;
    bad[last] ^= 0x10;
    let mut stream = Vec::new();
    stream.extend(encode_packet(&Frame::empty(2)));
    stream.extend(bad);
    stream.extend([START_TOKEN, ESCAPE_TOKEN, START_TOKEN]);
    stream.extend(encode_packet(&Frame::empty(3)));

    // Act
    link.feed(&stream);
    let mut frames = 0;
    while frames < 2 {
        if let SessionEvent::Frame(_) = next_event(&mut rx).await {
            frames += 1;
        }
    }
    session.stop();

    // Assert
    let snap = stats.snapshot();
    assert_eq!(snap.frames, 2);
    assert_eq!(snap.crc_mismatch, 1);
    assert_eq!(snap.special_byte_after_escape, 1);
    assert!(snap.closed);
}

#[test]
fn test_sink_trait_objects_compose() {
    // A stats wrapper around another sink is itself a sink.
    fn assert_sink<S: EventSink>(_: &S) {}
    let (channel, _rx) = ChannelSink::new();
    assert_sink(&StatsSink::new(channel));
}
