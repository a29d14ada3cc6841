//! Transport stream fixtures and demuxer tests.

use std::collections::HashMap;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use quickcheck_macros::quickcheck;

use super::types::*;
use super::TSDemuxer;
use crate::av::{AudioSample, VideoSample};
use crate::format::{Demuxer, DemuxerResult};
use crate::utils::Crc32Mpeg2;

pub(crate) const PMT_PID: u16 = 0x1000;
pub(crate) const VIDEO_PID: u16 = 0x100;
pub(crate) const AUDIO_PID: u16 = 0x101;
pub(crate) const ID3_PID: u16 = 0x102;

/// Baseline 640x480 SPS, `avc1.42e01e`.
pub(crate) const SPS: [u8; 9] = [0x67, 0x42, 0xE0, 0x1E, 0xF4, 0x05, 0x01, 0xEC, 0x80];
pub(crate) const PPS: [u8; 4] = [0x68, 0xCE, 0x38, 0x80];
pub(crate) const AUD: [u8; 2] = [0x09, 0xF0];

/// Writes PSI and PES payloads as 188-byte packets.
#[derive(Default)]
pub(crate) struct TsBuilder {
    out: Vec<u8>,
    counters: HashMap<u16, u8>,
}

impl TsBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn pat(&mut self) -> &mut Self {
        let mut section = vec![
            0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01,
            0xE0 | (PMT_PID >> 8) as u8,
            PMT_PID as u8,
        ];
        append_crc(&mut section);
        let mut payload = vec![0x00];
        payload.extend(section);
        self.packets(PID_PAT, &payload)
    }

    pub(crate) fn pmt(&mut self, streams: &[(u8, u16)]) -> &mut Self {
        let section_length = 9 + 5 * streams.len() + 4;
        let mut section = vec![
            0x02,
            0xB0 | (section_length >> 8) as u8,
            section_length as u8,
            0x00, 0x01, 0xC1, 0x00, 0x00,
            0xE0 | (VIDEO_PID >> 8) as u8,
            VIDEO_PID as u8,
            0xF0, 0x00,
        ];
        for &(stream_type, pid) in streams {
            section.extend_from_slice(&[stream_type, 0xE0 | (pid >> 8) as u8, pid as u8, 0xF0, 0x00]);
        }
        append_crc(&mut section);
        let mut payload = vec![0x00];
        payload.extend(section);
        self.packets(PMT_PID, &payload)
    }

    /// Standard program: H.264, AAC and ID3.
    pub(crate) fn program(&mut self) -> &mut Self {
        self.pat().pmt(&[
            (STREAM_TYPE_H264, VIDEO_PID),
            (STREAM_TYPE_AAC, AUDIO_PID),
            (STREAM_TYPE_METADATA, ID3_PID),
        ])
    }

    /// Splits `payload` over packets of `pid`, the first one flagged as a
    /// unit start, the last one padded with adaptation field stuffing.
    pub(crate) fn packets(&mut self, pid: u16, payload: &[u8]) -> &mut Self {
        let mut rest = payload;
        let mut first = true;
        while !rest.is_empty() {
            let counter = self.counters.entry(pid).or_insert(0);
            let cc = *counter;
            *counter = (cc + 1) & 0x0F;

            let take = rest.len().min(TS_PACKET_SIZE - TS_HEADER_SIZE);
            let mut packet = vec![
                SYNC_BYTE,
                (if first { 0x40 } else { 0x00 }) | (pid >> 8) as u8 & 0x1F,
                pid as u8,
                0x10 | cc,
            ];
            if take < TS_PACKET_SIZE - TS_HEADER_SIZE {
                packet[3] |= 0x20;
                let field_length = TS_PACKET_SIZE - TS_HEADER_SIZE - take - 1;
                packet.push(field_length as u8);
                if field_length > 0 {
                    packet.push(0x00);
                    packet.extend(std::iter::repeat(0xFF).take(field_length - 1));
                }
            }
            packet.extend_from_slice(&rest[..take]);
            debug_assert_eq!(packet.len(), TS_PACKET_SIZE);
            self.out.extend(packet);
            rest = &rest[take..];
            first = false;
        }
        self
    }

    pub(crate) fn video(&mut self, pts: Option<i64>, units: &[&[u8]]) -> &mut Self {
        let mut es = Vec::new();
        for unit in units {
            es.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            es.extend_from_slice(unit);
        }
        let pes = pes_packet(0xE0, pts, &es, false);
        self.packets(VIDEO_PID, &pes)
    }

    pub(crate) fn audio(&mut self, pts: Option<i64>, es: &[u8]) -> &mut Self {
        let pes = pes_packet(0xC0, pts, es, true);
        self.packets(AUDIO_PID, &pes)
    }

    pub(crate) fn id3(&mut self, pts: i64, tag: &[u8]) -> &mut Self {
        let pes = pes_packet(0xBD, Some(pts), tag, true);
        self.packets(ID3_PID, &pes)
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        self.out.clone()
    }
}

fn append_crc(section: &mut Vec<u8>) {
    let crc = Crc32Mpeg2::new().calculate(section);
    section.extend_from_slice(&crc.to_be_bytes());
}

fn timestamp(marker: u8, ts: i64) -> [u8; 5] {
    [
        marker | ((ts >> 29) & 0x0E) as u8 | 0x01,
        (ts >> 22) as u8,
        (((ts >> 14) & 0xFE) | 1) as u8,
        (ts >> 7) as u8,
        (((ts << 1) & 0xFE) | 1) as u8,
    ]
}

pub(crate) fn pes_packet(stream_id: u8, pts: Option<i64>, es: &[u8], bounded: bool) -> Vec<u8> {
    let mut header = vec![0x80, if pts.is_some() { 0x80 } else { 0x00 }];
    header.push(if pts.is_some() { 5 } else { 0 });
    if let Some(pts) = pts {
        header.extend_from_slice(&timestamp(0x20, pts));
    }
    let length = if bounded { header.len() + es.len() } else { 0 };

    let mut pes = vec![0x00, 0x00, 0x01, stream_id, (length >> 8) as u8, length as u8];
    pes.extend(header);
    pes.extend_from_slice(es);
    pes
}

/// ADTS frame: AAC-LC, 48 kHz, stereo.
pub(crate) fn adts_frame(fill: u8, payload_len: usize) -> Vec<u8> {
    let length = payload_len + 7;
    let mut frame = vec![
        0xFF,
        0xF1,
        0x4C,
        0x80 | ((length >> 11) & 0x03) as u8,
        ((length >> 3) & 0xFF) as u8,
        (((length & 0x07) << 5) as u8) | 0x1F,
        0xFC,
    ];
    frame.extend(std::iter::repeat(fill).take(payload_len));
    frame
}

pub(crate) fn idr_slice(fill: u8) -> Vec<u8> {
    let mut unit = vec![0x65, 0x88, 0x84];
    unit.extend(std::iter::repeat(fill).take(60));
    unit
}

pub(crate) fn non_idr_slice(fill: u8) -> Vec<u8> {
    let mut unit = vec![0x41, 0x9A, 0x02];
    unit.extend(std::iter::repeat(fill).take(40));
    unit
}

/// `frames` video access units at 30 fps, each followed by one audio PES
/// holding one ADTS frame, plus one ID3 tag. Starts at `base` ticks.
pub(crate) fn segment(base: i64, frames: usize) -> Vec<u8> {
    let mut ts = TsBuilder::new();
    ts.program();
    ts.id3(base, &crate::format::id3::timestamp_tag(base));
    for i in 0..frames {
        let pts = base + i as i64 * 3000;
        if i == 0 {
            ts.video(Some(pts), &[&AUD, &SPS, &PPS, &idr_slice(0x11)]);
        } else {
            ts.video(Some(pts), &[&AUD, &non_idr_slice(i as u8)]);
        }
        ts.audio(Some(base + i as i64 * 1920), &adts_frame(i as u8 + 1, 24));
    }
    ts.build()
}

#[derive(Debug, Default, PartialEq)]
struct Collected {
    video: Vec<VideoSample>,
    audio: Vec<AudioSample>,
    id3: usize,
}

impl Collected {
    fn add(&mut self, result: DemuxerResult) {
        self.video.extend(result.video.samples);
        self.audio.extend(result.audio.samples);
        self.id3 += result.id3.samples.len();
    }
}

fn demuxer() -> TSDemuxer {
    let mut demuxer = TSDemuxer::new();
    demuxer.reset_init_segment(None, None, 10.0);
    demuxer
}

fn demux_all(demuxer: &mut TSDemuxer, chunks: &[&[u8]]) -> Collected {
    let mut collected = Collected::default();
    for chunk in chunks {
        collected.add(demuxer.demux(Bytes::copy_from_slice(chunk), 0.0, true).unwrap());
    }
    collected.add(demuxer.flush(0.0).unwrap());
    collected
}

#[test]
fn test_probe() {
    assert!(TSDemuxer::probe(&segment(0, 2)));
    assert!(!TSDemuxer::probe(&adts_frame(0, 400)));
}

#[test]
fn test_demux_segment() {
    let mut demuxer = demuxer();
    let data = segment(900_000, 4);

    let result = demuxer.demux(Bytes::from(data), 0.0, false).unwrap();
    assert_eq!(result.video.codec.as_deref(), Some("avc1.42e01e"));
    assert_eq!((result.video.width, result.video.height), (640, 480));
    assert_eq!(result.video.pid, Some(VIDEO_PID));
    assert_eq!(result.audio.codec.as_deref(), Some("mp4a.40.2"));
    assert_eq!(result.audio.samplerate, Some(48_000));

    // a PES is parsed when the next one starts, an access unit is complete
    // when the next delimiter is seen
    assert_eq!(result.video.samples.len(), 2);
    assert_eq!(result.audio.samples.len(), 3);
    assert!(result.id3.samples.is_empty());

    let rest = demuxer.flush(0.0).unwrap();
    assert_eq!(rest.audio.samples.len(), 1);
    assert_eq!(rest.id3.samples.len(), 1);
    assert_eq!(rest.id3.samples[0].pts, 900_000);

    let first = &result.video.samples[0];
    assert!(first.key);
    assert_eq!(first.units.len(), 3);
    assert_eq!(&first.units[0][..], &SPS[..]);
    assert!(!result.video.samples[1].key);
    assert_eq!(result.video.samples[1].pts, 903_000);
    let pts: Vec<i64> = rest.video.samples.iter().map(|s| s.pts).collect();
    assert_eq!(pts, vec![906_000, 909_000]);

    let pts: Vec<i64> = result.audio.samples.iter().map(|s| s.pts).collect();
    assert_eq!(pts, vec![900_000, 901_920, 903_840]);
    assert_eq!(&result.audio.samples[1].unit[..], &[2u8; 24][..]);
}

#[quickcheck]
fn prop_chunked_demux_matches_whole(cuts: Vec<u16>) -> bool {
    let data = segment(90_000, 5);
    let whole = demux_all(&mut demuxer(), &[&data]);

    let mut points: Vec<usize> = cuts.into_iter().map(|c| c as usize % data.len()).collect();
    points.push(0);
    points.push(data.len());
    points.sort_unstable();
    points.dedup();
    let chunks: Vec<&[u8]> = points.windows(2).map(|w| &data[w[0]..w[1]]).collect();

    let chunked = demux_all(&mut demuxer(), &chunks);
    chunked == whole && whole.video.len() == 5 && whole.audio.len() == 5
}

#[test]
fn test_pmt_after_elementary_packets() {
    let mut ts = TsBuilder::new();
    ts.pat();
    ts.video(Some(0), &[&AUD, &SPS, &PPS, &idr_slice(1)]);
    ts.pmt(&[(STREAM_TYPE_H264, VIDEO_PID)]);
    ts.video(Some(3000), &[&AUD, &non_idr_slice(2)]);

    let collected = demux_all(&mut demuxer(), &[&ts.build()]);
    let pts: Vec<i64> = collected.video.iter().map(|s| s.pts).collect();
    assert_eq!(pts, vec![0, 3000]);
}

#[test]
fn test_audio_frame_spanning_pes() {
    let frames = [adts_frame(1, 30), adts_frame(2, 30), adts_frame(3, 30)];
    let mut first = frames[0].clone();
    first.extend_from_slice(&frames[1][..10]);
    let mut second = frames[1][10..].to_vec();
    second.extend_from_slice(&frames[2]);

    let mut ts = TsBuilder::new();
    ts.pat().pmt(&[(STREAM_TYPE_AAC, AUDIO_PID)]);
    ts.audio(Some(9000), &first);
    ts.audio(Some(9000 + 2 * 1920), &second);

    let collected = demux_all(&mut demuxer(), &[&ts.build()]);
    let pts: Vec<i64> = collected.audio.iter().map(|s| s.pts).collect();
    assert_eq!(pts, vec![9000, 10_920, 12_840]);
    assert_eq!(&collected.audio[1].unit[..], &[2u8; 30][..]);
}

#[test]
fn test_audio_overflow_without_pts() {
    let frames = [adts_frame(1, 30), adts_frame(2, 30)];
    let mut first = frames[0].clone();
    first.extend_from_slice(&frames[1][..20]);

    let mut ts = TsBuilder::new();
    ts.pat().pmt(&[(STREAM_TYPE_AAC, AUDIO_PID)]);
    ts.audio(Some(0), &first);
    let mut second = frames[1][20..].to_vec();
    second.extend(adts_frame(3, 30));
    ts.audio(None, &second);

    let collected = demux_all(&mut demuxer(), &[&ts.build()]);
    let pts: Vec<i64> = collected.audio.iter().map(|s| s.pts).collect();
    assert_eq!(pts, vec![0, 1920, 3840]);
}

#[test]
fn test_mpeg_audio_stream() {
    let mut frame = vec![0x22u8; 417];
    frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x44]);
    let mut es = frame.clone();
    es.extend_from_slice(&frame);

    let mut ts = TsBuilder::new();
    ts.pat().pmt(&[(STREAM_TYPE_MPEG1_AUDIO, AUDIO_PID)]);
    ts.audio(Some(1000), &es);

    let collected = demux_all(&mut demuxer(), &[&ts.build()]);
    assert_eq!(collected.audio.len(), 2);
    assert_eq!(collected.audio[0].unit.len(), 417);
    assert_eq!(collected.audio[1].pts, 1000 + 2351);
}

#[test]
fn test_leading_bytes_continue_previous_unit() {
    let idr = idr_slice(0x33);
    let mut second_pes = vec![0x44, 0x55];
    second_pes.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
    second_pes.extend_from_slice(&AUD);
    second_pes.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
    second_pes.extend_from_slice(&non_idr_slice(0x66));

    let mut ts = TsBuilder::new();
    ts.pat().pmt(&[(STREAM_TYPE_H264, VIDEO_PID)]);
    ts.video(Some(0), &[&AUD, &SPS, &PPS, &idr]);
    ts.packets(VIDEO_PID, &pes_packet(0xE0, Some(3000), &second_pes, false));

    let collected = demux_all(&mut demuxer(), &[&ts.build()]);
    assert_eq!(collected.video.len(), 2);
    let mut expected = idr.clone();
    expected.extend_from_slice(&[0x44, 0x55]);
    assert_eq!(&collected.video[0].units[2][..], &expected[..]);
}

#[test]
fn test_access_unit_without_timing_is_dropped() {
    let mut ts = TsBuilder::new();
    ts.pat().pmt(&[(STREAM_TYPE_H264, VIDEO_PID)]);
    ts.video(None, &[&AUD, &SPS, &PPS, &idr_slice(1)]);
    ts.video(Some(3000), &[&AUD, &non_idr_slice(2)]);
    ts.video(None, &[&AUD, &non_idr_slice(3)]);

    let mut demuxer = demuxer();
    let result = demuxer.demux(Bytes::from(ts.build()), 0.0, false).unwrap();
    assert_eq!(result.video.dropped, 1);
    let rest = demuxer.flush(0.0).unwrap();
    // the untimed unit after a timed one reuses its timestamps
    let pts: Vec<i64> = rest.video.samples.iter().map(|s| s.pts).collect();
    assert_eq!(pts, vec![3000, 3000]);
}

#[test]
fn test_stream_without_delimiters() {
    let mut ts = TsBuilder::new();
    ts.pat().pmt(&[(STREAM_TYPE_H264, VIDEO_PID)]);
    ts.video(Some(0), &[&SPS, &PPS, &idr_slice(1)]);
    ts.video(Some(3000), &[&non_idr_slice(2)]);
    ts.video(Some(6000), &[&non_idr_slice(3)]);

    let collected = demux_all(&mut demuxer(), &[&ts.build()]);
    let timing: Vec<(i64, bool)> = collected.video.iter().map(|s| (s.pts, s.key)).collect();
    assert_eq!(timing, vec![(0, true), (3000, false), (6000, false)]);
}

#[test]
fn test_trailing_partial_packet_is_kept() {
    let data = segment(0, 2);
    let mut demuxer = demuxer();
    let cut = data.len() - 100;
    demuxer.demux(Bytes::copy_from_slice(&data[..cut]), 0.0, false).unwrap();
    let rest = demuxer.demux(Bytes::copy_from_slice(&data[cut..]), 0.0, true).unwrap();
    let flushed = demuxer.flush(0.0).unwrap();
    assert_eq!(rest.audio.samples.len(), 1);
    assert_eq!(flushed.audio.samples.len(), 1);
}

#[test]
fn test_reset_contiguity_drops_partial_state() {
    let data = segment(0, 3);
    let mut demuxer = demuxer();
    demuxer.demux(Bytes::copy_from_slice(&data[..data.len() / 2]), 0.0, false).unwrap();
    demuxer.reset_contiguity();
    let flushed = demuxer.flush(0.0).unwrap();
    assert!(flushed.video.samples.is_empty());
    assert!(flushed.audio.samples.is_empty());
}

mod sample_aes {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::transmux::{DecryptData, Decrypter, EncryptionMethod};
    use async_trait::async_trait;

    struct InvertingDecrypter;

    #[async_trait]
    impl Decrypter for InvertingDecrypter {
        async fn decrypt(&self, data: Bytes, _key: &[u8; 16], _iv: &[u8; 16]) -> crate::Result<Bytes> {
            Ok(data.iter().map(|b| !b).collect::<Vec<u8>>().into())
        }
    }

    fn encrypted_segment() -> Vec<u8> {
        let mut ts = TsBuilder::new();
        ts.pat().pmt(&[
            (STREAM_TYPE_SAMPLE_AES_H264, VIDEO_PID),
            (STREAM_TYPE_SAMPLE_AES_AAC, AUDIO_PID),
        ]);
        ts.video(Some(0), &[&AUD, &SPS, &PPS, &idr_slice(0x11)]);
        ts.audio(Some(0), &adts_frame(0x22, 40));
        ts.build()
    }

    #[tokio::test]
    async fn test_samples_are_decrypted() {
        let mut demuxer = demuxer();
        let decrypt = DecryptData::new(EncryptionMethod::SampleAes, [7; 16], [0; 16]);
        let result = demuxer
            .demux_sample_aes(Bytes::from(encrypted_segment()), &decrypt, &InvertingDecrypter, 0.0, false)
            .await
            .unwrap();

        let unit = &result.audio.samples[0].unit;
        assert_eq!(&unit[..16], &[0x22u8; 16][..]);
        assert_eq!(&unit[16..32], &[!0x22u8; 16][..]);
        assert_eq!(&unit[32..], &[0x22u8; 8][..]);

        let slice = &result.video.samples[0].units[2];
        assert_eq!(slice[31], 0x11);
        assert_eq!(slice[32], !0x11);
        assert_eq!(slice[48], 0x11);
    }

    #[test]
    fn test_encrypted_streams_ignored_in_clear_demux() {
        let mut demuxer = demuxer();
        let mut collected = Collected::default();
        collected.add(demuxer.demux(Bytes::from(encrypted_segment()), 0.0, false).unwrap());
        collected.add(demuxer.flush(0.0).unwrap());
        assert_eq!(collected, Collected::default());
    }

    #[tokio::test]
    async fn test_missing_key_is_an_error() {
        let mut demuxer = demuxer();
        let decrypt = DecryptData {
            method: EncryptionMethod::SampleAes,
            ..Default::default()
        };
        let result = demuxer
            .demux_sample_aes(Bytes::from(encrypted_segment()), &decrypt, &InvertingDecrypter, 0.0, false)
            .await;
        assert!(matches!(result, Err(crate::HlsError::Decrypt(_))));
    }
}
