//! Spectrum sample processing: dequantization, averaging, max/min hold and
//! the autoscale trigger.
//!
//! One call to [`SpectrumProcessor::ingest_at`] per accepted spectrum frame.
//! Holds are updated for every frame, including frames the waterfall does not
//! draw while a drag is in progress.

use crate::config::SpectrumSettings;
use crate::dsp::autoscale::{self, DisplayRange};
use crate::wire::frame::SpectrumPayload;
use std::time::{Duration, Instant};

/// Used until the server has sent one finite offset/gain pair.
const FALLBACK_OFFSET_DB: f32 = 0.0;
const FALLBACK_GAIN_DB: f32 = 1.0;

const DEFAULT_RANGE: DisplayRange = DisplayRange {
    min_db: -120.0,
    max_db: -20.0,
    wf_min_db: -120.0,
    wf_max_db: -20.0,
};

/// `dB = offset + gain * raw`.
pub fn dequantize(raw: &[u8], offset: f32, gain: f32, out: &mut Vec<f64>) {
    let offset = f64::from(offset);
    let gain = f64::from(gain);
    out.clear();
    out.extend(raw.iter().map(|&b| offset + gain * f64::from(b)));
}

/// Smoothing factor for an exponential average over `n` frames; `0` for off.
pub fn averaging_alpha(n: u32) -> f64 {
    if n == 0 {
        0.0
    } else {
        2.0 / (f64::from(n) + 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct HoldState {
    pub averaging_alpha: f64,
    pub decay: f64,
    pub average: Vec<f64>,
    pub max: Vec<f64>,
    pub min: Vec<f64>,
    primed: bool,
}

impl HoldState {
    fn new(averaging_alpha: f64, decay: f64) -> Self {
        Self {
            averaging_alpha,
            decay,
            average: Vec::new(),
            max: Vec::new(),
            min: Vec::new(),
            primed: false,
        }
    }

    fn reset(&mut self, bins: usize) {
        self.average.clear();
        self.average.resize(bins, 0.0);
        self.max.clear();
        self.max.resize(bins, 0.0);
        self.min.clear();
        self.min.resize(bins, 0.0);
        self.primed = false;
    }

    fn update(&mut self, db: &[f64], max_hold: bool, min_hold: bool, settling: bool) {
        if !self.primed || self.average.len() != db.len() {
            self.reset(db.len());
            self.average.copy_from_slice(db);
            self.max.copy_from_slice(db);
            self.min.copy_from_slice(db);
            self.primed = true;
            return;
        }

        let alpha = self.averaging_alpha;
        if alpha > 0.0 {
            for (avg, &v) in self.average.iter_mut().zip(db) {
                *avg += alpha * (v - *avg);
            }
        } else {
            self.average.copy_from_slice(db);
        }

        if max_hold {
            let decay = self.decay;
            for (m, &v) in self.max.iter_mut().zip(db) {
                *m = if v > *m { v } else { v + decay * (*m - v) };
            }
        } else {
            self.max.copy_from_slice(db);
        }

        // The min side never decays; it follows the noise floor down only.
        if min_hold && !settling {
            for (m, &v) in self.min.iter_mut().zip(db) {
                if v < *m {
                    *m = v;
                }
            }
        } else {
            self.min.copy_from_slice(db);
        }
    }
}

/// Last finite reading of a float field.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LastGood(Option<f32>);

impl LastGood {
    pub fn accept(&mut self, v: f32, field: &'static str) -> Option<f32> {
        if v.is_finite() {
            self.0 = Some(v);
        } else {
            tracing::warn!(field, value = ?v, "non-finite value in spectrum frame; keeping previous");
        }
        self.0
    }

    pub fn get(&self) -> Option<f32> {
        self.0
    }
}

/// Front-end status carried by every spectrum frame, sanitized.
#[derive(Debug, Clone, Default)]
pub struct RfStatus {
    pub rf_atten_db: LastGood,
    pub rf_gain_db: LastGood,
    pub rf_level_cal_db: LastGood,
    pub if_power_dbfs: LastGood,
    pub noise_density_dbm: LastGood,
    pub rf_agc: bool,
    pub input_sample_rate: u32,
    pub input_samples: u64,
    pub overrange_count: u64,
    pub samples_since_overrange: u64,
    pub gps_time_ns: u64,
    pub zoom_level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoscaleTrigger {
    User,
    Server,
}

/// Result of one ingest. Borrows the processor's arrays.
#[derive(Debug)]
pub struct RenderableFrame<'a> {
    /// What the trace and the waterfall draw: averaged when averaging is on.
    pub db: &'a [f64],
    pub instantaneous: &'a [f64],
    pub max_hold: Option<&'a [f64]>,
    pub min_hold: Option<&'a [f64]>,
    /// Set when autoscale ran and produced a new range.
    pub range: Option<DisplayRange>,
    /// The bin count differs from the previous frame.
    pub resized: bool,
    pub center_hz: f64,
    pub bin_width_hz: f64,
    pub tuned_bin: Option<i64>,
}

pub struct SpectrumProcessor {
    settings: SpectrumSettings,
    started: Instant,
    hold: HoldState,
    db: Vec<f64>,
    range: DisplayRange,
    autoscale: Option<AutoscaleTrigger>,
    offset: LastGood,
    gain: LastGood,
    rf: RfStatus,
    last_geometry: Option<(u32, u32, u32)>,
    frames: u64,
}

impl SpectrumProcessor {
    pub fn new(settings: SpectrumSettings, now: Instant) -> Self {
        let range = DisplayRange::new(settings.initial_min_db, settings.initial_max_db)
            .unwrap_or(DEFAULT_RANGE)
            .with_waterfall_bias(settings.waterfall_bias_db);
        let hold = HoldState::new(
            averaging_alpha(settings.averaging),
            settings.max_hold_decay,
        );
        Self {
            started: now,
            hold,
            db: Vec::new(),
            range,
            autoscale: None,
            offset: LastGood::default(),
            gain: LastGood::default(),
            rf: RfStatus::default(),
            last_geometry: None,
            frames: 0,
            settings,
        }
    }

    pub fn ingest(&mut self, payload: &SpectrumPayload) -> RenderableFrame<'_> {
        self.ingest_at(payload, Instant::now())
    }

    pub fn ingest_at(&mut self, payload: &SpectrumPayload, now: Instant) -> RenderableFrame<'_> {
        self.frames += 1;
        self.update_rf_status(payload);

        let offset = self
            .offset
            .accept(payload.autorange_offset, "autorange_offset")
            .unwrap_or(FALLBACK_OFFSET_DB);
        let gain = self
            .gain
            .accept(payload.autorange_gain, "autorange_gain")
            .unwrap_or(FALLBACK_GAIN_DB);
        dequantize(&payload.raw_bins, offset, gain, &mut self.db);

        let geometry = (payload.bin_count, payload.center_hz, payload.bin_width_hz);
        let resized = match self.last_geometry {
            Some((bins, ..)) => bins != payload.bin_count,
            None => true,
        };
        if self.last_geometry != Some(geometry) {
            // New view from the server: re-fit the range to it.
            self.autoscale.get_or_insert(AutoscaleTrigger::Server);
        }
        self.last_geometry = Some(geometry);
        if resized {
            tracing::debug!(bins = payload.bin_count, "spectrum bin count changed; resetting holds");
            self.hold.reset(self.db.len());
        }

        let settling = now.saturating_duration_since(self.started) < self.settings.min_hold_settle();
        self.hold.update(
            &self.db,
            self.settings.max_hold,
            self.settings.min_hold,
            settling,
        );

        let tuned_bin = payload.tuned_bin();
        let range = self.run_autoscale(tuned_bin);

        let db = if self.hold.averaging_alpha > 0.0 {
            &self.hold.average[..]
        } else {
            &self.db[..]
        };
        RenderableFrame {
            db,
            instantaneous: &self.db,
            max_hold: self.settings.max_hold.then_some(&self.hold.max[..]),
            min_hold: self.settings.min_hold.then_some(&self.hold.min[..]),
            range,
            resized,
            center_hz: f64::from(payload.center_hz),
            bin_width_hz: f64::from(payload.bin_width_hz),
            tuned_bin,
        }
    }

    fn run_autoscale(&mut self, tuned_bin: Option<i64>) -> Option<DisplayRange> {
        let trigger = self.autoscale.take()?;
        let source = if self.hold.averaging_alpha > 0.0 {
            &self.hold.average
        } else {
            &self.db
        };
        let measured = tuned_bin.and_then(|bin| autoscale::measure_min_max(source, bin));
        let Some(mm) = measured else {
            tracing::debug!(?trigger, ?tuned_bin, "autoscale not applicable; keeping range");
            return None;
        };
        let range = autoscale::derive_range(
            mm,
            self.settings.min_ceiling_db,
            self.settings.waterfall_bias_db,
        )?;
        tracing::debug!(
            ?trigger,
            min_db = range.min_db,
            max_db = range.max_db,
            "autoscale applied"
        );
        self.range = range;
        Some(range)
    }

    fn update_rf_status(&mut self, p: &SpectrumPayload) {
        let rf = &mut self.rf;
        rf.rf_atten_db.accept(p.rf_atten_db, "rf_atten_db");
        rf.rf_gain_db.accept(p.rf_gain_db, "rf_gain_db");
        rf.rf_level_cal_db.accept(p.rf_level_cal_db, "rf_level_cal_db");
        rf.if_power_dbfs.accept(p.if_power_dbfs, "if_power_dbfs");
        rf.noise_density_dbm.accept(p.noise_density_dbm, "noise_density_dbm");
        rf.rf_agc = p.rf_agc != 0;
        rf.input_sample_rate = p.input_sample_rate;
        rf.input_samples = p.input_samples;
        rf.overrange_count = p.overrange_count;
        rf.samples_since_overrange = p.samples_since_overrange;
        rf.gps_time_ns = p.gps_time_ns;
        rf.zoom_level = p.zoom_level;
    }

    pub fn request_autoscale(&mut self) {
        self.autoscale = Some(AutoscaleTrigger::User);
    }

    pub fn autoscale_pending(&self) -> bool {
        self.autoscale.is_some()
    }

    /// Manual range entry. Rejects unordered or non-finite bounds.
    pub fn set_range(&mut self, min_db: f64, max_db: f64) -> bool {
        match DisplayRange::new(min_db, max_db) {
            Some(r) => {
                self.range = r.with_waterfall_bias(self.settings.waterfall_bias_db);
                true
            }
            None => false,
        }
    }

    pub fn set_averaging(&mut self, n: u32) {
        self.settings.averaging = n;
        self.hold.averaging_alpha = averaging_alpha(n);
    }

    pub fn set_max_hold(&mut self, on: bool) {
        self.settings.max_hold = on;
    }

    pub fn set_min_hold(&mut self, on: bool) {
        self.settings.min_hold = on;
    }

    pub fn set_max_hold_decay(&mut self, decay: f64) {
        if decay > 0.0 && decay <= 1.0 {
            self.settings.max_hold_decay = decay;
            self.hold.decay = decay;
        }
    }

    /// Drops all hold history; the next frame re-primes it.
    pub fn clear_holds(&mut self) {
        self.hold.primed = false;
    }

    /// Restarts the min-hold settle period.
    pub fn restart(&mut self, now: Instant) {
        self.started = now;
        self.clear_holds();
    }

    pub fn averaging(&self) -> u32 {
        self.settings.averaging
    }

    pub fn range(&self) -> DisplayRange {
        self.range
    }

    pub fn hold(&self) -> &HoldState {
        &self.hold
    }

    pub fn instantaneous(&self) -> &[f64] {
        &self.db
    }

    pub fn rf_status(&self) -> &RfStatus {
        &self.rf
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }
}
