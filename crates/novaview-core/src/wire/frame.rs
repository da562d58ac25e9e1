//! Binary frame codec for the spectrum/metadata/audio stream.
//!
//! Frames carry an RTP-style 12 byte header followed by a subtype specific
//! payload. Header words and the first four spectrum fields are big-endian,
//! the remaining spectrum fields are little-endian. That split is part of the
//! wire format and both directions here preserve it exactly.
//!
//! Decoding never panics and never reads past the buffer: every read checks
//! the remaining length first and reports [`DecodeError::Truncated`].

use bytes::{Buf, BufMut, Bytes};
use std::ops::Range;

pub const RTP_VERSION: u8 = 2;
pub const HEADER_LEN: usize = 12;

pub const SUBTYPE_SPECTRUM: u8 = 0x7F;
pub const SUBTYPE_CHANNEL_META: u8 = 0x7E;
pub const SUBTYPE_AUDIO: u8 = 0x7A;

pub const TAG_EOL: i8 = 0;
pub const TAG_DESCRIPTION: i8 = 4;
pub const TAG_LOW_EDGE: i8 = 39;
pub const TAG_HIGH_EDGE: i8 = 40;
pub const TAG_BASEBAND_POWER: i8 = 46;

/// Size of the fixed part of a spectrum payload, before the raw bins.
pub const SPECTRUM_FIXED_LEN: usize = 4 * 4 + 4 * 2 + 8 * 4 + 4 * 5 + 4 * 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame truncated at byte {at}: needed {needed} more bytes")]
    Truncated { at: usize, needed: usize },
    #[error("unknown frame subtype {0:#04x}")]
    UnknownSubtype(u8),
    #[error("unsupported header version {0}")]
    UnsupportedVersion(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub pad: bool,
    pub marker: bool,
    pub subtype: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub source_id: u32,
    pub csrc: Vec<u32>,
    /// Byte range of the extension body within the decoded buffer. Only the
    /// length is significant when writing.
    pub extension: Option<Range<usize>>,
}

impl FrameHeader {
    pub fn new(subtype: u8, sequence: u16, timestamp: u32, source_id: u32) -> Self {
        Self {
            version: RTP_VERSION,
            pad: false,
            marker: false,
            subtype,
            sequence,
            timestamp,
            source_id,
            csrc: Vec::new(),
            extension: None,
        }
    }

    pub fn has_extension(&self) -> bool {
        self.extension.is_some()
    }

    pub fn csrc_count(&self) -> usize {
        self.csrc.len()
    }

    /// Encoded length: `12 + 4·csrc + (ext ? 4 + ext_len : 0)`.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN
            + 4 * self.csrc.len()
            + self.extension.as_ref().map(|r| 4 + r.len()).unwrap_or(0)
    }

    pub fn write(&self, out: &mut impl BufMut) {
        let cc = (self.csrc.len() as u8) & 0x0f;
        out.put_u8(
            ((self.version & 0x03) << 6)
                | (u8::from(self.pad) << 5)
                | (u8::from(self.extension.is_some()) << 4)
                | cc,
        );
        out.put_u8((u8::from(self.marker) << 7) | (self.subtype & 0x7f));
        out.put_u16(self.sequence);
        out.put_u32(self.timestamp);
        out.put_u32(self.source_id);
        for id in self.csrc.iter().take(cc as usize) {
            out.put_u32(*id);
        }
        if let Some(ext) = &self.extension {
            out.put_u32(ext.len() as u32);
            out.put_bytes(0, ext.len());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumPayload {
    pub bin_count: u32,
    pub center_hz: u32,
    pub tuned_hz: u32,
    pub bin_width_hz: u32,
    pub input_sample_rate: u32,
    pub rf_agc: u32,
    pub input_samples: u64,
    pub overrange_count: u64,
    pub samples_since_overrange: u64,
    pub gps_time_ns: u64,
    pub rf_atten_db: f32,
    pub rf_gain_db: f32,
    pub rf_level_cal_db: f32,
    pub if_power_dbfs: f32,
    pub noise_density_dbm: f32,
    pub zoom_level: u32,
    pub autorange_offset: f32,
    pub autorange_gain: f32,
    pub raw_bins: Vec<u8>,
}

impl SpectrumPayload {
    /// Index of the tuned frequency in `raw_bins`, which may lie outside
    /// `0..bin_count` when the tuned frequency is off screen.
    pub fn tuned_bin(&self) -> Option<i64> {
        if self.bin_width_hz == 0 {
            return None;
        }
        let offset = i64::from(self.tuned_hz) - i64::from(self.center_hz);
        Some(offset.div_euclid(i64::from(self.bin_width_hz)) + i64::from(self.bin_count) / 2)
    }

    /// Frequency of the lower edge of bin 0.
    pub fn start_hz(&self) -> f64 {
        f64::from(self.center_hz) - f64::from(self.bin_width_hz) * f64::from(self.bin_count) / 2.0
    }

    pub fn span_hz(&self) -> f64 {
        f64::from(self.bin_width_hz) * f64::from(self.bin_count)
    }

    pub fn write(&self, out: &mut impl BufMut) {
        out.put_u32(self.bin_count);
        out.put_u32(self.center_hz);
        out.put_u32(self.tuned_hz);
        out.put_u32(self.bin_width_hz);
        out.put_u32_le(self.input_sample_rate);
        out.put_u32_le(self.rf_agc);
        out.put_u64_le(self.input_samples);
        out.put_u64_le(self.overrange_count);
        out.put_u64_le(self.samples_since_overrange);
        out.put_u64_le(self.gps_time_ns);
        out.put_f32_le(self.rf_atten_db);
        out.put_f32_le(self.rf_gain_db);
        out.put_f32_le(self.rf_level_cal_db);
        out.put_f32_le(self.if_power_dbfs);
        out.put_f32_le(self.noise_density_dbm);
        out.put_u32_le(self.zoom_level);
        out.put_f32_le(self.autorange_offset);
        out.put_f32_le(self.autorange_gain);
        out.put_slice(&self.raw_bins);
    }
}

/// Decoded channel status. Fields the frame did not carry stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMetadata {
    pub description: Option<String>,
    pub low_edge_hz: Option<f32>,
    pub high_edge_hz: Option<f32>,
    pub baseband_power: Option<f32>,
    pub unknown_tags: usize,
}

impl ChannelMetadata {
    /// Both filter edges, when the frame carried both.
    pub fn edges(&self) -> Option<(f32, f32)> {
        Some((self.low_edge_hz?, self.high_edge_hz?))
    }

    pub fn write(&self, out: &mut impl BufMut) {
        if let Some(text) = &self.description {
            let bytes = &text.as_bytes()[..text.len().min(127)];
            put_tlv(out, TAG_DESCRIPTION, bytes);
        }
        for (tag, value) in [
            (TAG_LOW_EDGE, self.low_edge_hz),
            (TAG_HIGH_EDGE, self.high_edge_hz),
            (TAG_BASEBAND_POWER, self.baseband_power),
        ] {
            if let Some(v) = value {
                put_tlv(out, tag, &v.to_bits().to_be_bytes());
            }
        }
        out.put_i8(TAG_EOL);
    }
}

fn put_tlv(out: &mut impl BufMut, tag: i8, value: &[u8]) {
    out.put_i8(tag);
    out.put_i8(value.len() as i8);
    out.put_slice(value);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub data: Bytes,
}

impl AudioPayload {
    /// PCM samples. The stream carries them big-endian, so every pair is
    /// swapped into host order; a trailing odd byte is dropped.
    pub fn samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Spectrum(SpectrumPayload),
    ChannelMeta(ChannelMetadata),
    Audio(AudioPayload),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Payload,
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.header.encoded_len() + 64);
        self.header.write(&mut out);
        match &self.payload {
            Payload::Spectrum(p) => p.write(&mut out),
            Payload::ChannelMeta(m) => m.write(&mut out),
            Payload::Audio(a) => out.put_slice(&a.data),
        }
        out
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
        }
    }

    fn pos(&self) -> usize {
        self.total - self.buf.remaining()
    }

    fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            return Err(DecodeError::Truncated {
                at: self.pos(),
                needed: n - self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn i8(&mut self) -> Result<i8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_i8())
    }

    fn u16_be(&mut self) -> Result<u16, DecodeError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    fn u32_be(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    fn u32_le(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    fn u64_le(&mut self) -> Result<u64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    fn f32_le(&mut self) -> Result<f32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_f32_le())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn skip(&mut self, n: usize) -> Result<Range<usize>, DecodeError> {
        let start = self.pos();
        self.take(n)?;
        Ok(start..start + n)
    }
}

/// Decodes one frame. The buffer is only borrowed for the call; the result
/// owns copies of everything it keeps.
pub fn decode(buf: &[u8]) -> Result<Frame, DecodeError> {
    let mut r = Reader::new(buf);
    let header = decode_header(&mut r)?;
    let payload = match header.subtype {
        SUBTYPE_SPECTRUM => Payload::Spectrum(decode_spectrum(&mut r)?),
        SUBTYPE_CHANNEL_META => Payload::ChannelMeta(decode_channel_meta(&mut r)?),
        SUBTYPE_AUDIO => Payload::Audio(AudioPayload {
            data: Bytes::copy_from_slice(r.take(r.remaining())?),
        }),
        other => return Err(DecodeError::UnknownSubtype(other)),
    };
    Ok(Frame { header, payload })
}

fn decode_header(r: &mut Reader<'_>) -> Result<FrameHeader, DecodeError> {
    let b0 = r.u8()?;
    let b1 = r.u8()?;
    let sequence = r.u16_be()?;
    let version = b0 >> 6;
    if version != RTP_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let timestamp = r.u32_be()?;
    let source_id = r.u32_be()?;

    let csrc_count = usize::from(b0 & 0x0f);
    let mut csrc = Vec::with_capacity(csrc_count);
    for _ in 0..csrc_count {
        csrc.push(r.u32_be()?);
    }

    let extension = if b0 & 0x10 != 0 {
        let len = r.u32_be()? as usize;
        Some(r.skip(len)?)
    } else {
        None
    };

    Ok(FrameHeader {
        version,
        pad: b0 & 0x20 != 0,
        marker: b1 & 0x80 != 0,
        subtype: b1 & 0x7f,
        sequence,
        timestamp,
        source_id,
        csrc,
        extension,
    })
}

fn decode_spectrum(r: &mut Reader<'_>) -> Result<SpectrumPayload, DecodeError> {
    let bin_count = r.u32_be()?;
    let center_hz = r.u32_be()?;
    let tuned_hz = r.u32_be()?;
    let bin_width_hz = r.u32_be()?;

    let input_sample_rate = r.u32_le()?;
    let rf_agc = r.u32_le()?;
    let input_samples = r.u64_le()?;
    let overrange_count = r.u64_le()?;
    let samples_since_overrange = r.u64_le()?;
    let gps_time_ns = r.u64_le()?;
    let rf_atten_db = r.f32_le()?;
    let rf_gain_db = r.f32_le()?;
    let rf_level_cal_db = r.f32_le()?;
    let if_power_dbfs = r.f32_le()?;
    let noise_density_dbm = r.f32_le()?;
    let zoom_level = r.u32_le()?;
    let autorange_offset = r.f32_le()?;
    let autorange_gain = r.f32_le()?;

    // Bound-check before allocating: bin_count comes off the wire.
    let raw_bins = r.take(bin_count as usize)?.to_vec();

    Ok(SpectrumPayload {
        bin_count,
        center_hz,
        tuned_hz,
        bin_width_hz,
        input_sample_rate,
        rf_agc,
        input_samples,
        overrange_count,
        samples_since_overrange,
        gps_time_ns,
        rf_atten_db,
        rf_gain_db,
        rf_level_cal_db,
        if_power_dbfs,
        noise_density_dbm,
        zoom_level,
        autorange_offset,
        autorange_gain,
        raw_bins,
    })
}

fn decode_channel_meta(r: &mut Reader<'_>) -> Result<ChannelMetadata, DecodeError> {
    let mut meta = ChannelMetadata::default();
    while r.remaining() > 0 {
        let tag = r.i8()?;
        if tag == TAG_EOL {
            break;
        }
        let len = tlv_len(r)?;
        let value = r.take(len)?;
        match tag {
            TAG_DESCRIPTION => {
                meta.description = Some(String::from_utf8_lossy(value).into_owned());
            }
            TAG_LOW_EDGE => meta.low_edge_hz = tlv_float(value),
            TAG_HIGH_EDGE => meta.high_edge_hz = tlv_float(value),
            TAG_BASEBAND_POWER => meta.baseband_power = tlv_float(value),
            _ => meta.unknown_tags += 1,
        }
    }
    Ok(meta)
}

/// Single length byte, or `0x80 | n` followed by `n` big-endian length bytes.
fn tlv_len(r: &mut Reader<'_>) -> Result<usize, DecodeError> {
    let first = r.i8()?;
    if first >= 0 {
        return Ok(first as usize);
    }
    let n = (first as u8) & 0x7f;
    let mut len = 0usize;
    for _ in 0..n {
        len = len.saturating_mul(256).saturating_add(usize::from(r.u8()?));
    }
    Ok(len)
}

/// Floats may arrive with leading zero bytes suppressed; up to 4 bytes are a
/// big-endian `f32`, up to 8 a big-endian `f64`.
fn tlv_float(value: &[u8]) -> Option<f32> {
    let bits = value
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    match value.len() {
        0..=4 => Some(f32::from_bits(bits as u32)),
        5..=8 => Some(f64::from_bits(bits) as f32),
        _ => None,
    }
}
