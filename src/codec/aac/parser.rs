use super::types::{ADTSHeader, ProfileType};
use crate::utils::BitReader;
use crate::{HlsError, Result};

/// Bytes needed to read the fixed and variable ADTS header.
pub const ADTS_HEADER_MIN: usize = 7;

/// Samples per AAC frame.
pub const AAC_SAMPLES_PER_FRAME: u32 = 1024;

/// Whether an ADTS sync word (layer 0) starts at `offset`.
pub fn is_header(data: &[u8], offset: usize) -> bool {
    offset + 1 < data.len() && data[offset] == 0xFF && (data[offset + 1] & 0xF6) == 0xF0
}

/// Whether a header can be read at `offset`.
pub fn can_parse(data: &[u8], offset: usize) -> bool {
    is_header(data, offset) && data.len() - offset >= ADTS_HEADER_MIN
}

/// A header at `offset` whose frame is followed by another header or by the
/// end of `data`.
pub fn probe(data: &[u8], offset: usize) -> bool {
    if !can_parse(data, offset) {
        return false;
    }
    let Ok(header) = parse_adts_header(&data[offset..]) else {
        return false;
    };
    let frame_length = header.frame_length as usize;
    if frame_length <= header.header_length() {
        return false;
    }
    let next = offset + frame_length;
    next == data.len() || is_header(data, next)
}

pub fn parse_adts_header(data: &[u8]) -> Result<ADTSHeader> {
    if data.len() < ADTS_HEADER_MIN {
        return Err(HlsError::Parser("ADTS header too short".into()));
    }

    let mut reader = BitReader::new(data);
    if reader.read_bits(12)? != 0xFFF {
        return Err(HlsError::Parser("Invalid ADTS sync word".into()));
    }

    let id = reader.read_bits(1)? as u8;
    let layer = reader.read_bits(2)? as u8;
    let protection_absent = reader.read_flag()?;
    let profile = ProfileType::from(reader.read_bits(2)? as u8);
    let sample_rate_index = reader.read_bits(4)? as u8;
    if sample_rate_index > 12 {
        return Err(HlsError::Parser(format!(
            "invalid ADTS sampling index {}",
            sample_rate_index
        )));
    }
    reader.skip_bits(1)?; // private bit
    let channel_configuration = reader.read_bits(3)? as u8;
    reader.skip_bits(4)?; // original/copy, home, copyright bits
    let frame_length = reader.read_bits(13)? as u16;
    let buffer_fullness = reader.read_bits(11)? as u16;
    let number_of_raw_blocks = reader.read_bits(2)? as u8;

    Ok(ADTSHeader {
        id,
        layer,
        protection_absent,
        profile,
        sample_rate_index,
        channel_configuration,
        frame_length,
        buffer_fullness,
        number_of_raw_blocks,
    })
}

/// Duration of one frame in 90 kHz ticks.
pub fn frame_duration(samplerate: u32) -> f64 {
    AAC_SAMPLES_PER_FRAME as f64 * 90_000.0 / samplerate as f64
}
