use crate::wire::frame::ChannelMetadata;
use std::collections::HashMap;

/// Read-only values the page widgets display. Updated by the session only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Telemetry {
    pub description: Option<String>,
    pub low_edge_hz: Option<f32>,
    pub high_edge_hz: Option<f32>,
    pub baseband_power_db: Option<f64>,
    pub tuned_hz: Option<f64>,
    pub center_hz: Option<f64>,
    pub bin_width_hz: Option<f64>,
    pub frames: FrameStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub decoded: u64,
    pub dropped: u64,
    pub lost: u64,
    pub late: u64,
    pub spectrum: u64,
    pub channel_meta: u64,
    pub audio: u64,
    pub audio_samples: u64,
}

impl Telemetry {
    pub fn apply_channel_meta(&mut self, meta: &ChannelMetadata) {
        if let Some(text) = &meta.description {
            self.description = Some(text.clone());
        }
        if let Some(low) = meta.low_edge_hz.filter(|v| v.is_finite()) {
            self.low_edge_hz = Some(low);
        }
        if let Some(high) = meta.high_edge_hz.filter(|v| v.is_finite()) {
            self.high_edge_hz = Some(high);
        }
        if let Some(p) = meta.baseband_power {
            match power_to_db(p) {
                Some(db) => self.baseband_power_db = Some(db),
                None => tracing::debug!(power = p, "unusable baseband power; keeping previous"),
            }
        }
    }
}

/// Linear power to dB; `None` for zero, negative or non-finite input.
pub fn power_to_db(power: f32) -> Option<f64> {
    let p = f64::from(power);
    (p.is_finite() && p > 0.0).then(|| 10.0 * p.log10())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqStatus {
    First,
    InOrder,
    /// Frames between the previous and this one never arrived.
    Gap(u16),
    Late,
}

/// Per-source sequence continuity with 16-bit wraparound.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last: HashMap<u32, u16>,
}

impl SequenceTracker {
    pub fn observe(&mut self, source_id: u32, seq: u16) -> SeqStatus {
        let Some(prev) = self.last.get(&source_id).copied() else {
            self.last.insert(source_id, seq);
            return SeqStatus::First;
        };
        let expected = prev.wrapping_add(1);
        let ahead = seq.wrapping_sub(expected);
        if ahead == 0 {
            self.last.insert(source_id, seq);
            SeqStatus::InOrder
        } else if ahead < 0x8000 {
            self.last.insert(source_id, seq);
            SeqStatus::Gap(ahead)
        } else {
            SeqStatus::Late
        }
    }

    pub fn reset(&mut self) {
        self.last.clear();
    }
}
