//! MPEG-1/2/2.5 audio frame headers (layers I to III).

use crate::{HlsError, Result};

/// kbit/s, five 14-entry columns: V1 L1, V1 L2, V1 L3, V2 L1, V2 L2/L3.
const BITRATES: [u32; 70] = [
    32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, //
    32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, //
    32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, //
    32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256, //
    8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160,
];

/// Hz, three-entry columns: MPEG-1, MPEG-2, MPEG-2.5.
const SAMPLE_RATES: [u32; 9] = [44100, 48000, 32000, 22050, 24000, 16000, 11025, 12000, 8000];

/// `[version][layer]` coefficient of the frame length formula.
const SAMPLE_COEFFICIENTS: [[u32; 4]; 4] = [
    [0, 72, 144, 12], // MPEG-2.5
    [0, 0, 0, 0],     // reserved
    [0, 72, 144, 12], // MPEG-2
    [0, 144, 144, 12], // MPEG-1
];

const BYTES_IN_SLOT: [u32; 4] = [0, 1, 1, 4];

pub const MPEG_AUDIO_HEADER_SIZE: usize = 4;

const VERSION_MPEG1: u8 = 3;
const VERSION_MPEG2: u8 = 2;
const VERSION_RESERVED: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpegAudioHeader {
    /// 3 = MPEG-1, 2 = MPEG-2, 0 = MPEG-2.5.
    pub version: u8,
    /// 3 = layer I, 2 = layer II, 1 = layer III.
    pub layer: u8,
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channel_count: u8,
    pub samples_per_frame: u32,
    pub frame_length: usize,
}

impl MpegAudioHeader {
    /// Duration of one frame in 90 kHz ticks.
    pub fn frame_duration(&self) -> f64 {
        self.samples_per_frame as f64 * 90_000.0 / self.sample_rate as f64
    }
}

fn is_header_pattern(data: &[u8], offset: usize) -> bool {
    data[offset] == 0xFF && (data[offset + 1] & 0xE0) == 0xE0 && (data[offset + 1] & 0x06) != 0
}

pub fn is_header(data: &[u8], offset: usize) -> bool {
    offset + 1 < data.len() && is_header_pattern(data, offset)
}

pub fn can_parse(data: &[u8], offset: usize) -> bool {
    is_header(data, offset) && data.len() - offset >= MPEG_AUDIO_HEADER_SIZE
}

/// A header at `offset` followed by another header or the end of `data`.
pub fn probe(data: &[u8], offset: usize) -> bool {
    if !is_header(data, offset) {
        return false;
    }
    let frame_length = parse_header(data, offset)
        .map(|h| h.frame_length)
        .unwrap_or(MPEG_AUDIO_HEADER_SIZE);
    let next = offset + frame_length;
    next == data.len() || is_header(data, next)
}

pub fn parse_header(data: &[u8], offset: usize) -> Result<MpegAudioHeader> {
    let header = data
        .get(offset..offset + MPEG_AUDIO_HEADER_SIZE)
        .ok_or_else(|| HlsError::Parser("MPEG audio header too short".into()))?;

    let version = (header[1] >> 3) & 0x03;
    let layer = (header[1] >> 1) & 0x03;
    let bitrate_index = ((header[2] >> 4) & 0x0F) as usize;
    let sample_rate_index = ((header[2] >> 2) & 0x03) as usize;
    if version == VERSION_RESERVED || layer == 0 || bitrate_index == 0 || bitrate_index == 15 || sample_rate_index == 3 {
        return Err(HlsError::Parser("unsupported MPEG audio header".into()));
    }

    let padding = ((header[2] >> 1) & 0x01) as u32;
    let channel_mode = header[3] >> 6;

    let bitrate_column = if version == VERSION_MPEG1 {
        3 - layer as usize
    } else if layer == 3 {
        3
    } else {
        4
    };
    let bitrate = BITRATES[bitrate_column * 14 + bitrate_index - 1] * 1000;

    let rate_column = match version {
        VERSION_MPEG1 => 0,
        VERSION_MPEG2 => 1,
        _ => 2,
    };
    let sample_rate = SAMPLE_RATES[rate_column * 3 + sample_rate_index];

    let coefficient = SAMPLE_COEFFICIENTS[version as usize][layer as usize];
    let bytes_in_slot = BYTES_IN_SLOT[layer as usize];
    let samples_per_frame = coefficient * 8 * bytes_in_slot;
    let frame_length = ((coefficient * bitrate / sample_rate + padding) * bytes_in_slot) as usize;

    Ok(MpegAudioHeader {
        version,
        layer,
        bitrate,
        sample_rate,
        channel_count: if channel_mode == 3 { 1 } else { 2 },
        samples_per_frame,
        frame_length,
    })
}
