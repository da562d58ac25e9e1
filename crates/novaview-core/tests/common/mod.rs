#![allow(dead_code)]

use novaview_core::control::CommandSink;
use novaview_core::wire::command::Command;
use novaview_core::wire::frame::{
    ChannelMetadata, Frame, FrameHeader, Payload, SpectrumPayload, SUBTYPE_CHANNEL_META,
    SUBTYPE_SPECTRUM,
};

pub fn spectrum(raw_bins: Vec<u8>, offset: f32, gain: f32) -> SpectrumPayload {
    SpectrumPayload {
        bin_count: raw_bins.len() as u32,
        center_hz: 10_000_000,
        tuned_hz: 10_000_000,
        bin_width_hz: 100,
        input_sample_rate: 64_800_000,
        rf_agc: 1,
        input_samples: 123_456_789,
        overrange_count: 7,
        samples_since_overrange: 1_000_000,
        gps_time_ns: 1_700_000_000_000_000_000,
        rf_atten_db: 10.0,
        rf_gain_db: 20.5,
        rf_level_cal_db: -3.25,
        if_power_dbfs: -40.0,
        noise_density_dbm: -165.0,
        zoom_level: 4,
        autorange_offset: offset,
        autorange_gain: gain,
        raw_bins,
    }
}

pub fn spectrum_frame(seq: u16, payload: SpectrumPayload) -> Vec<u8> {
    Frame {
        header: FrameHeader::new(SUBTYPE_SPECTRUM, seq, u32::from(seq) * 10, 0xfeed),
        payload: Payload::Spectrum(payload),
    }
    .encode()
}

pub fn edges_frame(seq: u16, low: f32, high: f32) -> Vec<u8> {
    Frame {
        header: FrameHeader::new(SUBTYPE_CHANNEL_META, seq, 0, 0xfeed),
        payload: Payload::ChannelMeta(ChannelMetadata {
            low_edge_hz: Some(low),
            high_edge_hz: Some(high),
            ..ChannelMetadata::default()
        }),
    }
    .encode()
}

/// Records every command text; can be flipped closed.
#[derive(Debug)]
pub struct RecordingSink {
    pub open: bool,
    pub sent: Vec<String>,
}

impl RecordingSink {
    pub fn open() -> Self {
        Self {
            open: true,
            sent: Vec::new(),
        }
    }

    pub fn closed() -> Self {
        Self {
            open: false,
            sent: Vec::new(),
        }
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.sent.iter().filter(|s| s.starts_with(prefix)).count()
    }
}

impl CommandSink for RecordingSink {
    fn is_open(&self) -> bool {
        self.open
    }

    fn send(&mut self, cmd: &Command) -> anyhow::Result<()> {
        anyhow::ensure!(self.open, "channel closed");
        self.sent.push(cmd.to_string());
        Ok(())
    }
}
