//! Outbound parameter changes with acknowledgement tracking.
//!
//! All writes to the message channel go through [`ControlChannel`]. Filter
//! edge changes are tracked until a channel status frame echoes them back.
//! The ack check and the timeout both act on the same [`PendingAck`] and both
//! check the retry budget before sending, so one evaluation sends at most once.

use crate::config::ControlSettings;
use crate::wire::command::{wire_decimal, Command};
use std::collections::VecDeque;
use std::mem::discriminant;
use std::time::Instant;

/// The send primitive of the message channel.
pub trait CommandSink {
    fn is_open(&self) -> bool;
    fn send(&mut self, cmd: &Command) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingAck {
    pub low_hz: f64,
    pub high_hz: f64,
    pub sent_at: Instant,
    pub retries: u8,
    timeout_resent_at: Option<Instant>,
}

impl PendingAck {
    fn new(low_hz: f64, high_hz: f64, now: Instant) -> Self {
        Self {
            low_hz,
            high_hz,
            sent_at: now,
            retries: 0,
            timeout_resent_at: None,
        }
    }

    /// Edges travel back as `f32`; compare at that precision.
    fn matches(&self, low: f32, high: f32) -> bool {
        self.low_hz as f32 == low && self.high_hz as f32 == high
    }

    fn command(&self) -> Command {
        Command::Edges {
            low_hz: self.low_hz,
            high_hz: self.high_hz,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckEvent {
    Idle,
    Waiting,
    Matched,
    Resent,
    Abandoned,
}

/// Counters for the diagnostic overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlDiagnostics {
    pub sent: u64,
    pub resent: u64,
    pub matched: u64,
    pub abandoned: u64,
    pub queued: u64,
    pub send_errors: u64,
}

#[derive(Debug, Default)]
struct AverageLimiter {
    last_sent: Option<Instant>,
    deferred: Option<u32>,
}

pub struct ControlChannel {
    settings: ControlSettings,
    pending: Option<PendingAck>,
    queue: VecDeque<Command>,
    average: AverageLimiter,
    diag: ControlDiagnostics,
}

impl ControlChannel {
    pub fn new(settings: ControlSettings) -> Self {
        Self {
            settings,
            pending: None,
            queue: VecDeque::new(),
            average: AverageLimiter::default(),
            diag: ControlDiagnostics::default(),
        }
    }

    pub fn pending(&self) -> Option<&PendingAck> {
        self.pending.as_ref()
    }

    pub fn queued(&self) -> impl Iterator<Item = &Command> {
        self.queue.iter()
    }

    pub fn diagnostics(&self) -> ControlDiagnostics {
        self.diag
    }

    /// Sends now, or queues until the channel opens. Returns whether it
    /// went out.
    pub fn send(&mut self, sink: &mut impl CommandSink, cmd: Command) -> bool {
        if !sink.is_open() {
            self.enqueue(cmd);
            return false;
        }
        match sink.send(&cmd) {
            Ok(()) => {
                tracing::trace!(cmd = %cmd, "command sent");
                self.diag.sent += 1;
                true
            }
            Err(e) => {
                tracing::warn!(cmd = %cmd, error = ?e, "command send failed; queued");
                self.diag.send_errors += 1;
                self.enqueue(cmd);
                false
            }
        }
    }

    /// Latest request of the same kind replaces a queued one; zoom steps and
    /// audio control keep their order and count.
    fn enqueue(&mut self, cmd: Command) {
        let coalesce = matches!(
            cmd,
            Command::Tune { .. }
                | Command::Mode(_)
                | Command::Edges { .. }
                | Command::Average(_)
                | Command::PollRate { .. }
        );
        if coalesce {
            self.queue
                .retain(|queued| discriminant(queued) != discriminant(&cmd));
        }
        self.diag.queued += 1;
        self.queue.push_back(cmd);
    }

    /// Re-queues commands the transport accepted but could not deliver.
    pub fn requeue(&mut self, cmd: Command) {
        self.enqueue(cmd);
    }

    /// Edges are tracked as they read on the wire, so an exact echo matches.
    pub fn send_edges(&mut self, sink: &mut impl CommandSink, low_hz: f64, high_hz: f64, now: Instant) {
        let (low_hz, high_hz) = (wire_decimal(low_hz), wire_decimal(high_hz));
        let cmd = Command::Edges { low_hz, high_hz };
        if self.send(sink, cmd) {
            self.pending = Some(PendingAck::new(low_hz, high_hz, now));
        } else {
            self.pending = None;
        }
    }

    /// `repeat` marks key auto-repeat, which is limited to one send per
    /// `average_repeat_ms`; the last value held back goes out on a later tick.
    pub fn send_average(&mut self, sink: &mut impl CommandSink, n: u32, repeat: bool, now: Instant) {
        if repeat {
            if let Some(last) = self.average.last_sent {
                if now.saturating_duration_since(last) < self.settings.average_repeat() {
                    self.average.deferred = Some(n);
                    return;
                }
            }
        }
        self.average.deferred = None;
        self.average.last_sent = Some(now);
        self.send(sink, Command::Average(n));
    }

    pub fn send_poll_rate(&mut self, sink: &mut impl CommandSink, ms: u32) {
        self.send(sink, Command::PollRate { ms });
    }

    /// Compares echoed filter edges with the outstanding request.
    pub fn on_ack_received(
        &mut self,
        sink: &mut impl CommandSink,
        low: f32,
        high: f32,
        now: Instant,
    ) -> AckEvent {
        let Some(pending) = self.pending.as_mut() else {
            return AckEvent::Idle;
        };
        if pending.matches(low, high) {
            tracing::debug!(low, high, retries = pending.retries, "filter edges acknowledged");
            self.pending = None;
            self.diag.matched += 1;
            return AckEvent::Matched;
        }
        tracing::debug!(
            want_low = pending.low_hz,
            want_high = pending.high_hz,
            low,
            high,
            "filter edge mismatch"
        );
        self.retry(sink, now)
    }

    /// Timer driven half of the retry logic, plus deferred average sends.
    pub fn on_tick(&mut self, sink: &mut impl CommandSink, now: Instant) -> AckEvent {
        if let (Some(n), Some(last)) = (self.average.deferred, self.average.last_sent) {
            if now.saturating_duration_since(last) >= self.settings.average_repeat() {
                self.average.deferred = None;
                self.average.last_sent = Some(now);
                self.send(sink, Command::Average(n));
            }
        }

        let Some((sent_at, timeout_resent_at)) = self
            .pending
            .as_ref()
            .map(|p| (p.sent_at, p.timeout_resent_at))
        else {
            return AckEvent::Idle;
        };
        match timeout_resent_at {
            None if now.saturating_duration_since(sent_at) >= self.settings.ack_timeout() => {
                let event = self.retry(sink, now);
                if let Some(p) = self.pending.as_mut() {
                    p.timeout_resent_at = Some(now);
                }
                event
            }
            Some(at) if now.saturating_duration_since(at) >= self.settings.ack_give_up() => {
                self.abandon("timeout");
                AckEvent::Abandoned
            }
            _ => AckEvent::Waiting,
        }
    }

    fn retry(&mut self, sink: &mut impl CommandSink, now: Instant) -> AckEvent {
        let Some(pending) = self.pending.as_mut() else {
            return AckEvent::Idle;
        };
        if pending.retries >= self.settings.ack_max_retries {
            self.abandon("retries exhausted");
            return AckEvent::Abandoned;
        }
        pending.retries += 1;
        pending.sent_at = now;
        let cmd = pending.command();
        let retries = pending.retries;
        if !sink.is_open() {
            // Flushed, and tracked afresh, when the channel reopens.
            self.pending = None;
            self.enqueue(cmd);
            return AckEvent::Waiting;
        }
        tracing::debug!(retries, "resending filter edges");
        self.diag.resent += 1;
        if !self.send(sink, cmd) {
            self.pending = None;
        }
        AckEvent::Resent
    }

    fn abandon(&mut self, reason: &'static str) {
        if let Some(p) = self.pending.take() {
            tracing::warn!(
                low = p.low_hz,
                high = p.high_hz,
                retries = p.retries,
                reason,
                "filter edges never acknowledged; giving up"
            );
            self.diag.abandoned += 1;
        }
    }

    /// Flushes everything queued while the channel was down, oldest first.
    pub fn on_channel_open(&mut self, sink: &mut impl CommandSink, now: Instant) {
        let queued: Vec<Command> = self.queue.drain(..).collect();
        if !queued.is_empty() {
            tracing::info!(count = queued.len(), "flushing queued commands");
        }
        for cmd in queued {
            if let Command::Edges { low_hz, high_hz } = cmd {
                self.send_edges(sink, low_hz, high_hz, now);
            } else {
                self.send(sink, cmd);
            }
        }
    }

    /// An unacknowledged edge change is kept for the next connection.
    pub fn on_channel_closed(&mut self) {
        if let Some(p) = self.pending.take() {
            self.enqueue(p.command());
        }
        self.average.last_sent = None;
        if let Some(n) = self.average.deferred.take() {
            self.enqueue(Command::Average(n));
        }
    }
}
