use super::*;
use bytes::Bytes;
use pretty_assertions::assert_eq;

/// Packs fixed width fields and ue(v) codes MSB first.
#[derive(Default)]
struct BitWriter {
    bits: Vec<bool>,
}

impl BitWriter {
    fn bits(&mut self, value: u32, n: u32) -> &mut Self {
        for i in (0..n).rev() {
            self.bits.push((value >> i) & 1 == 1);
        }
        self
    }

    fn ue(&mut self, value: u32) -> &mut Self {
        let code = value as u64 + 1;
        let width = 64 - code.leading_zeros();
        self.bits(0, width - 1);
        for i in (0..width).rev() {
            self.bits.push((code >> i) & 1 == 1);
        }
        self
    }

    fn finish(&mut self) -> Vec<u8> {
        // rbsp_stop_one_bit plus alignment
        self.bits.push(true);
        while self.bits.len() % 8 != 0 {
            self.bits.push(false);
        }
        self.bits
            .chunks(8)
            .map(|c| c.iter().fold(0u8, |acc, &b| (acc << 1) | b as u8))
            .collect()
    }
}

fn baseline_sps(width_mbs: u32, height_map_units: u32, crop_bottom: Option<u32>, sar: Option<(u32, u32)>) -> Vec<u8> {
    let mut w = BitWriter::default();
    w.bits(66, 8).bits(0xE0, 8).bits(30, 8);
    w.ue(0); // sps id
    w.ue(0); // log2_max_frame_num_minus4
    w.ue(0); // poc type
    w.ue(0); // log2_max_poc_lsb_minus4
    w.ue(1); // max_num_ref_frames
    w.bits(0, 1);
    w.ue(width_mbs - 1).ue(height_map_units - 1);
    w.bits(1, 1); // frame_mbs_only
    w.bits(1, 1); // direct_8x8
    match crop_bottom {
        Some(bottom) => {
            w.bits(1, 1).ue(0).ue(0).ue(0).ue(bottom);
        }
        None => {
            w.bits(0, 1);
        }
    }
    match sar {
        Some((h, v)) => {
            w.bits(1, 1).bits(1, 1).bits(255, 8).bits(h, 16).bits(v, 16);
        }
        None => {
            w.bits(0, 1);
        }
    }
    let mut nal = vec![0x67];
    nal.extend(w.finish());
    nal
}

#[test]
fn test_remove_emulation_prevention() {
    let mut parser = H264Parser::new();

    let output = parser.remove_emulation_prevention(&[0x00, 0x00, 0x03, 0x01]);
    assert_eq!(&output[..], &[0x00, 0x00, 0x01]);

    let output = parser.remove_emulation_prevention(&[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x02]);
    assert_eq!(&output[..], &[0x00, 0x00, 0x01, 0x00, 0x00, 0x02]);

    let input = [0x00, 0x01, 0x02, 0x03];
    let output = parser.remove_emulation_prevention(&input);
    assert_eq!(&output[..], &input);
}

#[test]
fn test_nal_unit_header() {
    let nalu = NALUnit::new(Bytes::from_static(&[0x65, 0x88, 0x84])).unwrap();
    assert_eq!(nalu.nal_type, 5);
    assert_eq!(nalu.nal_ref_idc, 3);
    assert_eq!(nalu.unit_type(), NALUnitType::CodedSliceIDR);
    assert!(NALUnit::new(Bytes::new()).is_none());
}

#[test]
fn test_parse_sps_dimensions_and_codec() {
    let mut parser = H264Parser::new();

    let sps = parser.parse_sps(&baseline_sps(40, 30, None, None)).unwrap();
    assert_eq!((sps.width, sps.height), (640, 480));
    assert_eq!(sps.pixel_ratio, (1, 1));
    assert_eq!(sps.codec_string(), "avc1.42e01e");

    let sps = parser.parse_sps(&baseline_sps(120, 68, Some(4), Some((4, 3)))).unwrap();
    assert_eq!((sps.width, sps.height), (1920, 1080));
    assert_eq!(sps.pixel_ratio, (4, 3));
}

#[test]
fn test_split_annexb() {
    let stream = Bytes::from_static(&[
        0xAA, 0xBB, // tail of a unit from an earlier buffer
        0x00, 0x00, 0x00, 0x01, 0x09, 0xF0, // AUD
        0x00, 0x00, 0x01, 0x65, 0x11, 0x22, 0x00, // IDR with trailing zero
        0x00, 0x00, 0x01, 0x41, 0x33,
    ]);
    let split = split_annexb(&stream);
    assert_eq!(split.leading.as_deref(), Some(&[0xAA, 0xBB][..]));
    assert_eq!(split.units.len(), 3);
    assert_eq!(&split.units[0][..], &[0x09, 0xF0]);
    assert_eq!(&split.units[1][..], &[0x65, 0x11, 0x22]);
    assert_eq!(&split.units[2][..], &[0x41, 0x33]);

    let split = split_annexb(&Bytes::from_static(&[0x00, 0x00, 0x01, 0x09, 0xF0]));
    assert_eq!(split.leading, None);
}

#[test]
fn test_read_slice_type() {
    let mut parser = H264Parser::new();
    let mut w = BitWriter::default();
    w.ue(0).ue(7);
    let mut nal = vec![0x41];
    nal.extend(w.finish());
    assert_eq!(parser.read_slice_type(&nal).unwrap(), 7);
}

#[test]
fn test_sei_captions() {
    let mut parser = H264Parser::new();
    let cc = [0xFC, 0x94, 0x20, 0xFC, 0x94, 0x2C];
    let mut payload = vec![0xB5, 0x00, 0x31, 0x47, 0x41, 0x39, 0x34, 0x03, 0x40 | 2, 0xFF];
    payload.extend_from_slice(&cc);
    payload.push(0xFF); // marker bits

    let mut nal = vec![0x06, 0x04, payload.len() as u8];
    nal.extend_from_slice(&payload);
    nal.push(0x80);

    let captions = parser.parse_sei_captions(&nal);
    assert_eq!(captions.len(), 1);
    assert_eq!(&captions[0][..], &cc);

    // unrelated SEI (recovery point)
    assert!(parser.parse_sei_captions(&[0x06, 0x06, 0x01, 0x84, 0x80]).is_empty());
}
