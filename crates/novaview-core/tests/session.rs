mod common;

use common::RecordingSink;
use novaview_core::config::Config;
use novaview_core::control::AckEvent;
use novaview_core::display::waterfall::{PointerOutcome, RowOutcome};
use novaview_core::session::{AudioSink, Session, SessionEvent};
use novaview_core::wire::frame::{FrameHeader, SUBTYPE_AUDIO};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn frame(seq: u16, bins: usize) -> Vec<u8> {
    common::spectrum_frame(seq, common::spectrum(vec![40; bins], -120.0, 0.5))
}

fn session(t0: Instant) -> Session {
    Session::new(Config::default(), t0)
}

#[test]
fn opening_restates_poll_rate_and_averaging() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut s = session(t0);
    s.on_channel_open(&mut sink, t0);
    assert_eq!(sink.sent, vec!["M:usb", "r:100", "g:0"]);
}

#[test]
fn reconnect_restates_mode_and_last_tune() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut s = session(t0);
    s.on_channel_open(&mut sink, t0);
    s.tune(&mut sink, 7_074_400.0);
    s.set_mode(&mut sink, "lsb");

    sink.open = false;
    s.on_channel_closed();
    s.reset(t0);
    sink.sent.clear();

    sink.open = true;
    s.on_channel_open(&mut sink, t0);
    assert_eq!(sink.sent, vec!["F:7074", "M:lsb", "r:100", "g:0"]);
}

#[test]
fn non_finite_edges_do_not_spend_a_retry() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut s = session(t0);
    s.set_edges(&mut sink, -3000.0, -50.0, t0);

    for (low, high) in [(f32::NAN, f32::NAN), (f32::INFINITY, -50.0)] {
        let event = s.on_binary(&mut sink, &common::edges_frame(1, low, high), t0);
        assert_eq!(event, SessionEvent::ChannelMeta { ack: AckEvent::Idle });
    }
    assert_eq!(s.control().pending().unwrap().retries, 0);
    assert_eq!(sink.count("e:"), 1);

    let event = s.on_binary(&mut sink, &common::edges_frame(2, -3000.0, -50.0), t0);
    assert_eq!(event, SessionEvent::ChannelMeta { ack: AckEvent::Matched });
}

#[test]
fn spectrum_frame_feeds_the_waterfall() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut s = session(t0);

    let event = s.on_binary(&mut sink, &frame(1, 64), t0);
    let SessionEvent::Spectrum { row, range } = event else {
        panic!("expected spectrum, got {event:?}");
    };
    assert_eq!(row, RowOutcome::Drawn);
    assert!(range.is_some());
    assert_eq!(s.waterfall().width(), 64);
    assert_eq!(s.waterfall().range(), s.spectrum().range());
    assert_eq!(s.telemetry().center_hz, Some(10_000_000.0));
    assert_eq!(s.telemetry().frames.spectrum, 1);
}

#[test]
fn undecodable_frames_are_counted_and_dropped() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut s = session(t0);
    let mut buf = frame(1, 16);
    buf.truncate(30);
    assert!(matches!(
        s.on_binary(&mut sink, &buf, t0),
        SessionEvent::Dropped(_)
    ));
    assert_eq!(s.telemetry().frames.dropped, 1);
    assert_eq!(s.telemetry().frames.decoded, 0);
}

#[test]
fn sequence_gaps_count_lost_frames() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut s = session(t0);
    s.on_binary(&mut sink, &frame(1, 16), t0);
    s.on_binary(&mut sink, &frame(5, 16), t0);
    s.on_binary(&mut sink, &frame(4, 16), t0);
    assert_eq!(s.telemetry().frames.lost, 3);
    assert_eq!(s.telemetry().frames.late, 1);
}

#[test]
fn edge_echo_acknowledges_the_request() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut s = session(t0);
    s.set_edges(&mut sink, -3000.0, -50.0, t0);
    let event = s.on_binary(
        &mut sink,
        &common::edges_frame(1, -3000.0, -50.0),
        t0 + Duration::from_millis(200),
    );
    assert_eq!(
        event,
        SessionEvent::ChannelMeta {
            ack: AckEvent::Matched
        }
    );
    assert!(s.control().pending().is_none());
    assert_eq!(s.telemetry().low_edge_hz, Some(-3000.0));
    assert_eq!(sink.count("e:"), 1);
}

#[test]
fn drag_sends_recenter_and_suppresses_rows() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut s = session(t0);
    s.on_binary(&mut sink, &frame(1, 16), t0);

    s.pointer_down(2.0, t0);
    assert!(matches!(
        s.pointer_move(&mut sink, 10.0, t0),
        PointerOutcome::Recenter { .. }
    ));
    assert_eq!(sink.sent, vec!["Z:c:9999.2"]);

    let event = s.on_binary(&mut sink, &frame(2, 16), t0);
    assert!(matches!(
        event,
        SessionEvent::Spectrum {
            row: RowOutcome::Suppressed,
            ..
        }
    ));
    // The spectrum kept updating underneath.
    assert_eq!(s.spectrum().frames(), 2);

    s.pointer_up(&mut sink, 10.0, t0 + Duration::from_millis(30));
    assert_eq!(sink.sent, vec!["Z:c:9999.2", "Z:c:9999.2"]);
    assert!(!s.waterfall().is_dragging());
}

#[test]
fn click_tunes_to_the_snapped_frequency() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut s = session(t0);
    s.on_binary(&mut sink, &frame(1, 16), t0);

    s.pointer_down(12.0, t0);
    let outcome = s.pointer_up(&mut sink, 12.0, t0 + Duration::from_millis(50));
    assert_eq!(
        outcome,
        PointerOutcome::Click {
            freq_hz: 10_000_400.0
        }
    );
    assert_eq!(sink.sent, vec!["F:10000"]);
}

#[test]
fn commands_issued_offline_go_out_on_open() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::closed();
    let mut s = session(t0);
    s.tune(&mut sink, 7_074_400.0);
    s.set_mode(&mut sink, "lsb");
    assert!(sink.sent.is_empty());

    sink.open = true;
    s.on_channel_open(&mut sink, t0);
    assert_eq!(sink.sent, vec!["F:7074", "M:lsb", "r:100", "g:0"]);
}

#[derive(Clone, Default)]
struct Collect(Arc<Mutex<Vec<i16>>>);

impl AudioSink for Collect {
    fn push(&mut self, samples: &[i16]) {
        self.0.lock().unwrap().extend_from_slice(samples);
    }
}

#[test]
fn audio_reaches_the_sink() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut s = session(t0);
    let out = Collect::default();
    s.set_audio_sink(Box::new(out.clone()));

    let mut buf = Vec::new();
    FrameHeader::new(SUBTYPE_AUDIO, 1, 0, 7).write(&mut buf);
    buf.extend_from_slice(&[0x00, 0x10, 0xff, 0xff]);
    assert_eq!(
        s.on_binary(&mut sink, &buf, t0),
        SessionEvent::Audio { samples: 2 }
    );
    assert_eq!(*out.0.lock().unwrap(), vec![16, -1]);
    assert_eq!(s.telemetry().frames.audio_samples, 2);
}

#[test]
fn reset_keeps_queued_commands() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::closed();
    let mut s = session(t0);
    s.on_binary(&mut sink, &frame(1, 16), t0);
    s.tune(&mut sink, 7_000_000.0);
    s.reset(t0);
    assert_eq!(s.waterfall().width(), 0);
    assert_eq!(s.telemetry().frames.decoded, 0);
    assert_eq!(s.control().queued().count(), 1);
}
