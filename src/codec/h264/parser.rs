use bytes::{BufMut, Bytes, BytesMut};

use super::types::SPSInfo;
use crate::utils::BitReader;
use crate::Result;

/// Sample aspect ratios for `aspect_ratio_idc` 1..=16 (Table E-1).
const SAMPLE_ASPECT_RATIOS: [(u32, u32); 16] = [
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

const EXTENDED_SAR: u8 = 255;

/// SEI payload type carrying ATSC A/53 caption data.
const SEI_USER_DATA_REGISTERED: u32 = 4;
const ATSC_USER_IDENTIFIER: u32 = 0x4741_3934; // "GA94"

/// NAL units found in an Annex B byte stream.
#[derive(Debug, Default, PartialEq)]
pub struct AnnexBUnits {
    /// Bytes before the first start code; they continue a unit started in an
    /// earlier buffer.
    pub leading: Option<Bytes>,
    pub units: Vec<Bytes>,
}

/// Splits an Annex B stream on `00 00 01` / `00 00 00 01` start codes.
/// Zero bytes in front of a start code are dropped from the preceding unit.
pub fn split_annexb(data: &Bytes) -> AnnexBUnits {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            starts.push((i, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    let trim = |mut end: usize, begin: usize| {
        while end > begin && data[end - 1] == 0 {
            end -= 1;
        }
        end
    };

    let mut result = AnnexBUnits::default();
    let first = starts.first().map_or(data.len(), |&(code, _)| code);
    let leading_end = trim(first, 0);
    if leading_end > 0 {
        result.leading = Some(data.slice(0..leading_end));
    }

    for (n, &(_, begin)) in starts.iter().enumerate() {
        let end = starts.get(n + 1).map_or(data.len(), |&(code, _)| code);
        let end = trim(end, begin);
        if end > begin {
            result.units.push(data.slice(begin..end));
        }
    }
    result
}

#[derive(Debug, Default)]
pub struct H264Parser {
    buffer: BytesMut,
}

impl H264Parser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Strips `emulation_prevention_three_byte`s, turning a NAL unit into RBSP.
    pub fn remove_emulation_prevention(&mut self, data: &[u8]) -> Bytes {
        self.buffer.clear();
        self.buffer.reserve(data.len());
        let mut zeros = 0;
        for &byte in data {
            if zeros >= 2 && byte == 0x03 {
                zeros = 0;
                continue;
            }
            zeros = if byte == 0 { zeros + 1 } else { 0 };
            self.buffer.put_u8(byte);
        }
        self.buffer.split().freeze()
    }

    /// Parses an SPS NAL unit (header byte included).
    pub fn parse_sps(&mut self, nal: &[u8]) -> Result<SPSInfo> {
        let rbsp = self.remove_emulation_prevention(nal.get(1..).unwrap_or_default());
        let mut reader = BitReader::new(&rbsp);

        let profile_idc = reader.read_u8()?;
        let profile_compatibility = reader.read_u8()?;
        let level_idc = reader.read_u8()?;
        reader.skip_golomb()?; // seq_parameter_set_id

        let mut chroma_format_idc = 1;
        if matches!(
            profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        ) {
            chroma_format_idc = reader.read_golomb()?;
            if chroma_format_idc == 3 {
                reader.skip_bits(1)?; // separate_colour_plane_flag
            }
            reader.skip_golomb()?; // bit_depth_luma_minus8
            reader.skip_golomb()?; // bit_depth_chroma_minus8
            reader.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
            if reader.read_flag()? {
                let count = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..count {
                    if reader.read_flag()? {
                        skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                    }
                }
            }
        }

        reader.skip_golomb()?; // log2_max_frame_num_minus4
        match reader.read_golomb()? {
            0 => reader.skip_golomb()?, // log2_max_pic_order_cnt_lsb_minus4
            1 => {
                reader.skip_bits(1)?; // delta_pic_order_always_zero_flag
                reader.read_signed_golomb()?; // offset_for_non_ref_pic
                reader.read_signed_golomb()?; // offset_for_top_to_bottom_field
                let cycle = reader.read_golomb()?;
                for _ in 0..cycle {
                    reader.read_signed_golomb()?;
                }
            }
            _ => {}
        }
        reader.skip_golomb()?; // max_num_ref_frames
        reader.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

        let pic_width_in_mbs = reader.read_golomb()? + 1;
        let pic_height_in_map_units = reader.read_golomb()? + 1;
        let frame_mbs_only = reader.read_flag()?;
        if !frame_mbs_only {
            reader.skip_bits(1)?; // mb_adaptive_frame_field_flag
        }
        reader.skip_bits(1)?; // direct_8x8_inference_flag

        let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
        if reader.read_flag()? {
            crop_left = reader.read_golomb()?;
            crop_right = reader.read_golomb()?;
            crop_top = reader.read_golomb()?;
            crop_bottom = reader.read_golomb()?;
        }

        let mut pixel_ratio = (1, 1);
        if reader.read_flag()? && reader.read_flag()? {
            let idc = reader.read_u8()?;
            if idc == EXTENDED_SAR {
                pixel_ratio = (reader.read_bits(16)?, reader.read_bits(16)?);
            } else if (1..=16).contains(&idc) {
                pixel_ratio = SAMPLE_ASPECT_RATIOS[idc as usize - 1];
            }
        }

        let (crop_unit_x, crop_unit_y) = match (chroma_format_idc, frame_mbs_only) {
            (0, true) => (1, 1),
            (0, false) => (1, 2),
            (3, true) => (1, 1),
            (3, false) => (1, 2),
            (2, true) => (2, 1),
            (2, false) => (2, 2),
            (_, true) => (2, 2),
            (_, false) => (2, 4),
        };
        let width = pic_width_in_mbs * 16;
        let height = (2 - frame_mbs_only as u32) * pic_height_in_map_units * 16;

        Ok(SPSInfo {
            profile_idc,
            profile_compatibility,
            level_idc,
            width: width.saturating_sub(crop_unit_x * (crop_left + crop_right)),
            height: height.saturating_sub(crop_unit_y * (crop_top + crop_bottom)),
            pixel_ratio,
        })
    }

    /// Reads `slice_type` from a slice NAL unit (header byte included).
    pub fn read_slice_type(&mut self, nal: &[u8]) -> Result<u32> {
        let head = &nal[..nal.len().min(16)];
        let rbsp = self.remove_emulation_prevention(head.get(1..).unwrap_or_default());
        let mut reader = BitReader::new(&rbsp);
        reader.skip_golomb()?; // first_mb_in_slice
        reader.read_golomb()
    }

    /// Extracts `cc_data` triplets from ATSC A/53 user data in an SEI NAL unit.
    pub fn parse_sei_captions(&mut self, nal: &[u8]) -> Vec<Bytes> {
        let rbsp = self.remove_emulation_prevention(nal.get(1..).unwrap_or_default());
        let mut captions = Vec::new();
        let mut pos = 0;

        while pos < rbsp.len() && rbsp[pos] != 0x80 {
            let mut payload_type = 0u32;
            while pos < rbsp.len() && rbsp[pos] == 0xFF {
                payload_type += 255;
                pos += 1;
            }
            let Some(&last) = rbsp.get(pos) else { break };
            payload_type += last as u32;
            pos += 1;

            let mut payload_size = 0usize;
            while pos < rbsp.len() && rbsp[pos] == 0xFF {
                payload_size += 255;
                pos += 1;
            }
            let Some(&last) = rbsp.get(pos) else { break };
            payload_size += last as usize;
            pos += 1;

            let end = (pos + payload_size).min(rbsp.len());
            if payload_type == SEI_USER_DATA_REGISTERED {
                if let Some(cc) = atsc_cc_data(&rbsp[pos..end]) {
                    captions.push(cc);
                }
            }
            pos = end;
        }
        captions
    }
}

fn atsc_cc_data(payload: &[u8]) -> Option<Bytes> {
    if payload.len() < 10 || payload[0] != 0xB5 {
        return None;
    }
    let provider = u16::from_be_bytes([payload[1], payload[2]]);
    let user_identifier = u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]);
    if provider != 0x31 || user_identifier != ATSC_USER_IDENTIFIER || payload[7] != 0x03 {
        return None;
    }
    let flags = payload[8];
    if flags & 0x40 == 0 {
        return None;
    }
    let count = (flags & 0x1F) as usize;
    // payload[9] is em_data
    payload.get(10..10 + count * 3).map(Bytes::copy_from_slice)
}

fn skip_scaling_list(reader: &mut BitReader, size: usize) -> Result<()> {
    let mut last_scale = 8;
    let mut next_scale = 8;
    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = reader.read_signed_golomb()?;
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        last_scale = if next_scale == 0 { last_scale } else { next_scale };
    }
    Ok(())
}
