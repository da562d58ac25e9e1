mod common;

use common::RecordingSink;
use novaview_core::config::ControlSettings;
use novaview_core::control::{AckEvent, ControlChannel};
use novaview_core::wire::command::{Command, ZoomRequest};
use std::time::{Duration, Instant};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn channel() -> ControlChannel {
    ControlChannel::new(ControlSettings::default())
}

#[test]
fn ack_within_timeout_clears_without_resend() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut ctl = channel();
    ctl.send_edges(&mut sink, -3000.0, -50.0, t0);
    assert_eq!(sink.sent, vec!["e:-3000:-50"]);
    assert!(ctl.pending().is_some());

    assert_eq!(ctl.on_tick(&mut sink, t0 + ms(300)), AckEvent::Waiting);
    assert_eq!(
        ctl.on_ack_received(&mut sink, -3000.0, -50.0, t0 + ms(400)),
        AckEvent::Matched
    );
    assert!(ctl.pending().is_none());
    assert_eq!(ctl.on_tick(&mut sink, t0 + ms(5000)), AckEvent::Idle);
    assert_eq!(sink.count("e:"), 1);
    assert_eq!(ctl.diagnostics().matched, 1);
    assert_eq!(ctl.diagnostics().resent, 0);
}

#[test]
fn echo_of_rounded_edges_is_an_ack() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut ctl = channel();
    ctl.send_edges(&mut sink, -3000.12345, 2799.9996, t0);
    assert_eq!(sink.sent, vec!["e:-3000.123:2800"]);
    assert_eq!(ctl.pending().unwrap().low_hz, -3000.123);
    assert_eq!(ctl.pending().unwrap().high_hz, 2800.0);

    assert_eq!(
        ctl.on_ack_received(&mut sink, -3000.123f32, 2800.0, t0 + ms(100)),
        AckEvent::Matched
    );
    assert_eq!(sink.count("e:"), 1);
}

#[test]
fn edges_queued_while_closed_are_tracked_as_sent() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::closed();
    let mut ctl = channel();
    ctl.send_edges(&mut sink, -3000.12345, -50.0, t0);

    sink.open = true;
    ctl.on_channel_open(&mut sink, t0 + ms(10));
    assert_eq!(sink.sent, vec!["e:-3000.123:-50"]);
    assert_eq!(
        ctl.on_ack_received(&mut sink, -3000.123f32, -50.0, t0 + ms(100)),
        AckEvent::Matched
    );
}

#[test]
fn silence_resends_once_then_gives_up() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut ctl = channel();
    ctl.send_edges(&mut sink, -3000.0, -50.0, t0);

    assert_eq!(ctl.on_tick(&mut sink, t0 + ms(799)), AckEvent::Waiting);
    assert_eq!(ctl.on_tick(&mut sink, t0 + ms(800)), AckEvent::Resent);
    assert_eq!(sink.count("e:"), 2);

    assert_eq!(ctl.on_tick(&mut sink, t0 + ms(1600)), AckEvent::Waiting);
    assert_eq!(ctl.on_tick(&mut sink, t0 + ms(2799)), AckEvent::Waiting);
    assert_eq!(ctl.on_tick(&mut sink, t0 + ms(2800)), AckEvent::Abandoned);
    assert!(ctl.pending().is_none());

    assert_eq!(ctl.on_tick(&mut sink, t0 + ms(10_000)), AckEvent::Idle);
    assert_eq!(sink.count("e:"), 2);
    assert_eq!(ctl.diagnostics().abandoned, 1);
}

#[test]
fn mismatching_acks_resend_exactly_three_times() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut ctl = channel();
    ctl.send_edges(&mut sink, -3000.0, -50.0, t0);

    for i in 1..=3 {
        assert_eq!(
            ctl.on_ack_received(&mut sink, -2800.0, -50.0, t0 + ms(10 * i)),
            AckEvent::Resent
        );
    }
    assert_eq!(
        ctl.on_ack_received(&mut sink, -2800.0, -50.0, t0 + ms(40)),
        AckEvent::Abandoned
    );
    assert_eq!(
        ctl.on_ack_received(&mut sink, -2800.0, -50.0, t0 + ms(50)),
        AckEvent::Idle
    );
    assert_eq!(sink.count("e:"), 4);
    assert_eq!(ctl.diagnostics().resent, 3);
}

#[test]
fn ack_and_timeout_share_one_retry_budget() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut ctl = channel();
    ctl.send_edges(&mut sink, 50.0, 2800.0, t0);

    ctl.on_ack_received(&mut sink, 0.0, 2800.0, t0 + ms(100));
    ctl.on_ack_received(&mut sink, 0.0, 2800.0, t0 + ms(200));
    assert_eq!(ctl.pending().unwrap().retries, 2);

    // The timer counts from the last resend.
    assert_eq!(ctl.on_tick(&mut sink, t0 + ms(999)), AckEvent::Waiting);
    assert_eq!(ctl.on_tick(&mut sink, t0 + ms(1000)), AckEvent::Resent);
    assert_eq!(ctl.pending().unwrap().retries, 3);

    assert_eq!(
        ctl.on_ack_received(&mut sink, 0.0, 2800.0, t0 + ms(1100)),
        AckEvent::Abandoned
    );
    assert_eq!(sink.count("e:"), 4);
}

#[test]
fn newer_edges_replace_the_pending_ack() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut ctl = channel();
    ctl.send_edges(&mut sink, -3000.0, -50.0, t0);
    ctl.send_edges(&mut sink, -2400.0, -50.0, t0 + ms(100));
    assert_eq!(ctl.pending().unwrap().low_hz, -2400.0);
    assert_eq!(
        ctl.on_ack_received(&mut sink, -2400.0, -50.0, t0 + ms(200)),
        AckEvent::Matched
    );
}

#[test]
fn closed_channel_queues_and_flushes_in_order() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::closed();
    let mut ctl = channel();

    assert!(!ctl.send(&mut sink, Command::tune_hz(7_000_000.0)));
    ctl.send(&mut sink, Command::tune_hz(7_100_000.0));
    ctl.send(&mut sink, Command::Zoom(ZoomRequest::In));
    ctl.send(&mut sink, Command::Zoom(ZoomRequest::In));
    ctl.send_edges(&mut sink, -3000.0, -50.0, t0);
    assert!(sink.sent.is_empty());
    assert!(ctl.pending().is_none());
    assert_eq!(ctl.queued().count(), 4);

    sink.open = true;
    ctl.on_channel_open(&mut sink, t0 + ms(500));
    assert_eq!(sink.sent, vec!["F:7100", "Z:+", "Z:+", "e:-3000:-50"]);
    assert_eq!(ctl.queued().count(), 0);

    let pending = ctl.pending().unwrap();
    assert_eq!(pending.sent_at, t0 + ms(500));
    assert_eq!(pending.retries, 0);
}

#[test]
fn unacknowledged_edges_survive_a_reconnect() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut ctl = channel();
    ctl.send_edges(&mut sink, -3000.0, -50.0, t0);

    sink.open = false;
    ctl.on_channel_closed();
    assert!(ctl.pending().is_none());
    assert_eq!(ctl.on_tick(&mut sink, t0 + ms(900)), AckEvent::Idle);

    sink.open = true;
    ctl.on_channel_open(&mut sink, t0 + ms(1000));
    assert_eq!(sink.count("e:-3000:-50"), 2);
    assert!(ctl.pending().is_some());
}

#[test]
fn average_repeat_is_rate_limited_with_trailing_send() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut ctl = channel();

    ctl.send_average(&mut sink, 5, false, t0);
    ctl.send_average(&mut sink, 6, true, t0 + ms(100));
    ctl.send_average(&mut sink, 7, true, t0 + ms(200));
    assert_eq!(sink.sent, vec!["g:5"]);

    ctl.on_tick(&mut sink, t0 + ms(300));
    assert_eq!(sink.count("g:"), 1);
    ctl.on_tick(&mut sink, t0 + ms(333));
    assert_eq!(sink.sent, vec!["g:5", "g:7"]);

    ctl.on_tick(&mut sink, t0 + ms(1000));
    assert_eq!(sink.count("g:"), 2);

    // A deliberate single press is never held back.
    ctl.send_average(&mut sink, 9, false, t0 + ms(1001));
    assert_eq!(sink.sent.last().map(String::as_str), Some("g:9"));
}

#[test]
fn deferred_average_is_queued_on_close() {
    let t0 = Instant::now();
    let mut sink = RecordingSink::open();
    let mut ctl = channel();
    ctl.send_average(&mut sink, 5, true, t0);
    ctl.send_average(&mut sink, 8, true, t0 + ms(50));
    ctl.on_channel_closed();

    sink.open = true;
    ctl.on_channel_open(&mut sink, t0 + ms(60));
    assert_eq!(sink.sent, vec!["g:5", "g:8"]);
}
