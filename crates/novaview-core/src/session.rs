//! Per-connection context tying the decoder, the spectrum processor, the
//! waterfall and the control channel together.
//!
//! One `Session` lives as long as one connection and is reset on reconnect.
//! Every input (binary frame, timer tick, pointer event, widget request) is a
//! synchronous method call; nothing here blocks or spawns.

use crate::config::Config;
use crate::control::{AckEvent, CommandSink, ControlChannel};
use crate::display::waterfall::{Geometry, PointerOutcome, RowOutcome, WaterfallBuffer};
use crate::dsp::autoscale::DisplayRange;
use crate::dsp::spectrum::SpectrumProcessor;
use crate::telemetry::{SeqStatus, SequenceTracker, Telemetry};
use crate::wire::command::{Command, ZoomRequest};
use crate::wire::frame::{self, DecodeError, Payload};
use std::time::Instant;

/// Receives decoded PCM. Playback lives outside this crate.
pub trait AudioSink {
    fn push(&mut self, samples: &[i16]);
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Spectrum {
        row: RowOutcome,
        range: Option<DisplayRange>,
    },
    ChannelMeta {
        ack: AckEvent,
    },
    Audio {
        samples: usize,
    },
    Dropped(DecodeError),
}

pub struct Session {
    cfg: Config,
    spectrum: SpectrumProcessor,
    waterfall: WaterfallBuffer,
    control: ControlChannel,
    telemetry: Telemetry,
    sequence: SequenceTracker,
    audio: Option<Box<dyn AudioSink + Send>>,
    last_tune_hz: Option<f64>,
}

/// Rounds to the nearest multiple of `step_hz`.
pub fn snap_to_step(hz: f64, step_hz: f64) -> f64 {
    if !(step_hz > 0.0) || !step_hz.is_finite() {
        return hz;
    }
    (hz / step_hz).round() * step_hz
}

impl Session {
    pub fn new(cfg: Config, now: Instant) -> Self {
        let spectrum = SpectrumProcessor::new(cfg.spectrum.clone(), now);
        let waterfall = WaterfallBuffer::new(0, &cfg.waterfall, spectrum.range());
        let control = ControlChannel::new(cfg.control.clone());
        Self {
            spectrum,
            waterfall,
            control,
            telemetry: Telemetry::default(),
            sequence: SequenceTracker::default(),
            audio: None,
            last_tune_hz: None,
            cfg,
        }
    }

    /// Fresh state for a new connection. Commands still queued for the
    /// server survive the reset.
    pub fn reset(&mut self, now: Instant) {
        self.spectrum = SpectrumProcessor::new(self.cfg.spectrum.clone(), now);
        self.waterfall = WaterfallBuffer::new(0, &self.cfg.waterfall, self.spectrum.range());
        self.telemetry = Telemetry::default();
        self.sequence.reset();
    }

    pub fn set_audio_sink(&mut self, sink: Box<dyn AudioSink + Send>) {
        self.audio = Some(sink);
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn spectrum(&self) -> &SpectrumProcessor {
        &self.spectrum
    }

    pub fn spectrum_mut(&mut self) -> &mut SpectrumProcessor {
        &mut self.spectrum
    }

    pub fn waterfall(&self) -> &WaterfallBuffer {
        &self.waterfall
    }

    pub fn control(&self) -> &ControlChannel {
        &self.control
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn on_binary(&mut self, sink: &mut impl CommandSink, buf: &[u8], now: Instant) -> SessionEvent {
        let frame = match frame::decode(buf) {
            Ok(frame) => frame,
            Err(e) => {
                self.telemetry.frames.dropped += 1;
                tracing::warn!(len = buf.len(), error = %e, "dropping frame");
                return SessionEvent::Dropped(e);
            }
        };
        self.telemetry.frames.decoded += 1;

        match self.sequence.observe(frame.header.source_id, frame.header.sequence) {
            SeqStatus::Gap(n) => {
                self.telemetry.frames.lost += u64::from(n);
                tracing::debug!(seq = frame.header.sequence, lost = n, "sequence gap");
            }
            SeqStatus::Late => {
                self.telemetry.frames.late += 1;
                tracing::debug!(seq = frame.header.sequence, "late frame");
            }
            SeqStatus::First | SeqStatus::InOrder => {}
        }

        match frame.payload {
            Payload::Spectrum(p) => {
                self.telemetry.frames.spectrum += 1;
                self.telemetry.tuned_hz = Some(f64::from(p.tuned_hz));
                self.telemetry.center_hz = Some(f64::from(p.center_hz));
                self.telemetry.bin_width_hz = Some(f64::from(p.bin_width_hz));

                let out = self.spectrum.ingest_at(&p, now);
                if out.resized {
                    self.waterfall.resize(out.db.len());
                }
                if let Some(range) = out.range {
                    self.waterfall.set_range(range);
                }
                self.waterfall
                    .set_geometry(Geometry::new(out.center_hz, out.bin_width_hz));
                let row = self.waterfall.push_row(out.db);
                tracing::trace!(seq = frame.header.sequence, bins = p.bin_count, ?row, "spectrum frame");
                SessionEvent::Spectrum {
                    row,
                    range: out.range,
                }
            }
            Payload::ChannelMeta(meta) => {
                self.telemetry.frames.channel_meta += 1;
                self.telemetry.apply_channel_meta(&meta);
                let ack = match meta.edges() {
                    Some((low, high)) if low.is_finite() && high.is_finite() => {
                        self.control.on_ack_received(sink, low, high, now)
                    }
                    Some((low, high)) => {
                        tracing::debug!(low, high, "non-finite filter edges; not an ack");
                        AckEvent::Idle
                    }
                    None => AckEvent::Idle,
                };
                SessionEvent::ChannelMeta { ack }
            }
            Payload::Audio(audio) => {
                let samples = audio.samples();
                self.telemetry.frames.audio += 1;
                self.telemetry.frames.audio_samples += samples.len() as u64;
                if let Some(out) = self.audio.as_mut() {
                    out.push(&samples);
                }
                SessionEvent::Audio {
                    samples: samples.len(),
                }
            }
        }
    }

    /// Flushes anything queued while disconnected, then restates the
    /// session's poll rate and averaging. A fresh server session also gets
    /// the last tuned frequency and the mode again.
    pub fn on_channel_open(&mut self, sink: &mut impl CommandSink, now: Instant) {
        if let Some(hz) = self.last_tune_hz {
            self.control.requeue(Command::tune_hz(hz));
        }
        self.control
            .requeue(Command::Mode(self.cfg.tuning.mode.clone()));
        self.control.on_channel_open(sink, now);
        self.control.send_poll_rate(sink, self.cfg.control.poll_ms);
        self.control
            .send_average(sink, self.spectrum.averaging(), false, now);
    }

    pub fn on_channel_closed(&mut self) {
        tracing::info!("message channel closed");
        self.control.on_channel_closed();
    }

    pub fn on_tick(&mut self, sink: &mut impl CommandSink, now: Instant) -> AckEvent {
        self.control.on_tick(sink, now)
    }

    pub fn pointer_down(&mut self, x_px: f64, now: Instant) -> PointerOutcome {
        self.waterfall.pointer_down(x_px, now)
    }

    pub fn pointer_move(&mut self, sink: &mut impl CommandSink, x_px: f64, now: Instant) -> PointerOutcome {
        let outcome = self.waterfall.pointer_move(x_px, now);
        if let PointerOutcome::Recenter { center_hz } = outcome {
            self.control.send(sink, Command::center_hz(center_hz));
        }
        outcome
    }

    pub fn pointer_up(&mut self, sink: &mut impl CommandSink, x_px: f64, now: Instant) -> PointerOutcome {
        let outcome = self.waterfall.pointer_up(x_px, now);
        match outcome {
            PointerOutcome::Committed { center_hz, .. } => {
                self.control.send(sink, Command::center_hz(center_hz));
            }
            PointerOutcome::Click { freq_hz } => {
                self.tune(sink, freq_hz);
            }
            _ => {}
        }
        outcome
    }

    pub fn set_surface_width(&mut self, px: f64) {
        self.waterfall.set_surface_width(px);
    }

    /// Tunes to `hz` snapped to the configured step.
    pub fn tune(&mut self, sink: &mut impl CommandSink, hz: f64) -> f64 {
        let hz = snap_to_step(hz, self.cfg.tuning.step_hz);
        self.last_tune_hz = Some(hz);
        self.control.send(sink, Command::tune_hz(hz));
        hz
    }

    pub fn set_mode(&mut self, sink: &mut impl CommandSink, mode: &str) {
        self.cfg.tuning.mode = mode.to_string();
        self.control.send(sink, Command::Mode(mode.to_string()));
    }

    pub fn zoom(&mut self, sink: &mut impl CommandSink, zoom: ZoomRequest) {
        self.control.send(sink, Command::Zoom(zoom));
    }

    pub fn set_edges(&mut self, sink: &mut impl CommandSink, low_hz: f64, high_hz: f64, now: Instant) {
        self.control.send_edges(sink, low_hz, high_hz, now);
    }

    /// Local averaging follows immediately; the server is told subject to
    /// the key-repeat limit.
    pub fn set_average(&mut self, sink: &mut impl CommandSink, n: u32, repeat: bool, now: Instant) {
        self.spectrum.set_averaging(n);
        self.control.send_average(sink, n, repeat, now);
    }

    pub fn set_poll_rate(&mut self, sink: &mut impl CommandSink, ms: u32) {
        self.cfg.control.poll_ms = ms;
        self.control.send_poll_rate(sink, ms);
    }

    pub fn audio(&mut self, sink: &mut impl CommandSink, start: bool, id: &str) {
        self.control.send(
            sink,
            Command::Audio {
                start,
                id: id.to_string(),
            },
        );
    }

    pub fn request_autoscale(&mut self) {
        self.spectrum.request_autoscale();
    }

    /// Manual range; also recolors future waterfall rows.
    pub fn set_range(&mut self, min_db: f64, max_db: f64) -> bool {
        if !self.spectrum.set_range(min_db, max_db) {
            return false;
        }
        self.waterfall.set_range(self.spectrum.range());
        true
    }

    pub fn set_line_decimation(&mut self, n: u8) {
        self.waterfall.set_line_decimation(n);
    }

    pub fn requeue(&mut self, cmd: Command) {
        self.control.requeue(cmd);
    }
}
