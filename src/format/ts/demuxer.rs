use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use super::parser::{sync_offset, TSPacketParser};
use super::pes::{PESAssembler, PESPacket};
use super::sample_aes;
use super::types::*;
use crate::av::{AudioSample, AudioTrack, MetadataSample, MetadataTrack, TextSample, TextTrack, VideoSample, VideoTrack};
use crate::codec::aac::parser as adts;
use crate::codec::h264::{split_annexb, H264Parser, NALUnit};
use crate::codec::mpeg_audio;
use crate::format::{aac, mp3, ChunkCache, Demuxer, DemuxerResult};
use crate::transmux::{DecryptData, Decrypter};
use crate::{HlsError, Result};

/// An access unit being collected; timing may still be unknown.
#[derive(Debug)]
struct PendingAccessUnit {
    key: bool,
    frame: bool,
    pts: Option<i64>,
    dts: Option<i64>,
    units: Vec<Bytes>,
}

impl PendingAccessUnit {
    fn new(pes: &PESPacket) -> Self {
        Self {
            key: false,
            frame: false,
            pts: pes.pts,
            dts: pes.dts,
            units: Vec::new(),
        }
    }
}

/// The head of an audio frame cut off by the end of its PES packet.
#[derive(Debug)]
struct AudioOverflow {
    pts: i64,
    frame: BytesMut,
    header_length: usize,
    /// Bytes still to come; `None` when even the header was incomplete.
    missing: Option<usize>,
}

/// MPEG transport stream demuxer.
///
/// Extracts H.264, AAC or MPEG audio, and ID3 timed metadata from the first
/// program of the stream:
/// - PAT/PMT parsing for stream selection
/// - PES reassembly per PID across chunks
/// - access unit building from NAL units, with CEA-608 captions from SEI
/// - audio framing with frames spanning PES packets
pub struct TSDemuxer {
    parser: TSPacketParser,
    h264: H264Parser,
    cache: ChunkCache,
    pmt_pid: Option<u16>,
    pmt_parsed: bool,
    audio_codec: Option<AudioStreamCodec>,
    video: VideoTrack,
    audio: AudioTrack,
    id3: MetadataTrack,
    text: TextTrack,
    video_pes: PESAssembler,
    audio_pes: PESAssembler,
    id3_pes: PESAssembler,
    pending_avc: Option<PendingAccessUnit>,
    aud_found: bool,
    /// Timing of the last pushed access unit, for units whose PES had none.
    last_avc_timing: Option<(i64, i64)>,
    audio_overflow: Option<AudioOverflow>,
}

impl TSDemuxer {
    pub fn new() -> Self {
        Self {
            parser: TSPacketParser::new(),
            h264: H264Parser::new(),
            cache: ChunkCache::new(),
            pmt_pid: None,
            pmt_parsed: false,
            audio_codec: None,
            video: VideoTrack::new(0.0),
            audio: AudioTrack::new(0.0),
            id3: MetadataTrack::new(),
            text: TextTrack::new(),
            video_pes: PESAssembler::new(),
            audio_pes: PESAssembler::new(),
            id3_pes: PESAssembler::new(),
            pending_avc: None,
            aud_found: false,
            last_avc_timing: None,
            audio_overflow: None,
        }
    }

    fn result(&mut self) -> DemuxerResult {
        DemuxerResult {
            audio: self.audio.take_samples(),
            video: self.video.take_samples(),
            id3: self.id3.take_samples(),
            text: self.text.take_samples(),
        }
    }

    /// Walks whole packets of `data` (after any cached remainder). With
    /// `flush`, nothing is kept for later and pending PES data is parsed.
    fn demux_packets(&mut self, data: Bytes, flush: bool, sample_aes: bool) -> DemuxerResult {
        let data = self.cache.join(data);
        let mut len = data.len();
        if len < TS_PACKET_SIZE && !flush {
            self.cache.push(&data);
            return self.result();
        }

        let sync = sync_offset(&data).unwrap_or(0);
        if sync > 0 {
            log::warn!("[tsdemuxer] skipping {} bytes before the first sync byte", sync);
        }
        len -= (len.saturating_sub(sync)) % TS_PACKET_SIZE;
        if len < data.len() {
            if flush {
                log::warn!(
                    "[tsdemuxer] dropping {} trailing bytes that do not form a TS packet",
                    data.len() - len
                );
            } else {
                self.cache.push(&data[len..]);
            }
        }

        let mut packet_errors = 0usize;
        let mut unknown_pids = false;
        let mut start = sync;
        while start + TS_PACKET_SIZE <= len {
            let packet_start = start;
            start += TS_PACKET_SIZE;
            let packet = &data[packet_start..start];

            let header = match self.parser.parse_header(packet) {
                Ok(header) => header,
                Err(_) => {
                    packet_errors += 1;
                    continue;
                }
            };
            if header.transport_error {
                packet_errors += 1;
                continue;
            }
            let Some(offset) = self.parser.payload_offset(packet, &header) else {
                continue;
            };
            let pid = header.pid;
            let payload = data.slice(packet_start + offset..start);

            if Some(pid) == self.video.pid {
                if header.payload_unit_start {
                    if let Some(pes) = self.video_pes.take() {
                        self.parse_avc_pes(pes, false);
                    }
                }
                self.video_pes.push(payload);
            } else if Some(pid) == self.audio.pid {
                if header.payload_unit_start {
                    if let Some(pes) = self.audio_pes.take() {
                        self.parse_audio_pes(pes);
                    }
                }
                self.audio_pes.push(payload);
            } else if Some(pid) == self.id3.pid {
                if header.payload_unit_start {
                    if let Some(pes) = self.id3_pes.take() {
                        self.parse_id3_pes(pes);
                    }
                }
                self.id3_pes.push(payload);
            } else if pid == PID_PAT {
                if !header.payload_unit_start {
                    continue;
                }
                match self.parser.section(&payload, true).and_then(|s| self.parser.parse_pat(s)) {
                    Ok(pat) => self.pmt_pid = pat.first_pmt_pid(),
                    Err(e) => log::warn!("[tsdemuxer] invalid PAT: {}", e),
                }
            } else if Some(pid) == self.pmt_pid {
                if !header.payload_unit_start {
                    continue;
                }
                let pmt = match self.parser.section(&payload, true).and_then(|s| self.parser.parse_pmt(s)) {
                    Ok(pmt) => pmt,
                    Err(e) => {
                        log::warn!("[tsdemuxer] invalid PMT: {}", e);
                        continue;
                    }
                };
                self.select_streams(pmt.select_streams(sample_aes));
                if unknown_pids && !self.pmt_parsed {
                    log::debug!("[tsdemuxer] PMT found after elementary packets, parsing again from the start");
                    unknown_pids = false;
                    start = sync;
                }
                self.pmt_parsed = true;
            } else if pid != PID_SDT && pid != PID_NULL {
                unknown_pids = true;
            }
        }

        if packet_errors > 0 {
            log::warn!(
                "[tsdemuxer] found {} TS packet(s) without sync byte or with transport errors",
                packet_errors
            );
        }
        if flush {
            self.extract_remaining();
        }
        self.result()
    }

    fn select_streams(&mut self, pids: SelectedPids) {
        if let Some(pid) = pids.avc {
            self.video.pid = Some(pid);
        }
        if let Some((pid, codec)) = pids.audio {
            self.audio.pid = Some(pid);
            self.audio.is_aac = codec == AudioStreamCodec::Aac;
            self.audio_codec = Some(codec);
        }
        if let Some(pid) = pids.id3 {
            self.id3.pid = Some(pid);
        }
        log::debug!(
            "[tsdemuxer] PMT: video {:?}, audio {:?} ({:?}), id3 {:?}",
            self.video.pid,
            self.audio.pid,
            self.audio_codec,
            self.id3.pid
        );
    }

    /// Parses PES data left at the end of a fragment. Truncated packets stay
    /// buffered; the rest of them may arrive with the next fragment.
    fn extract_remaining(&mut self) {
        if let Some(pes) = self.video_pes.take_complete() {
            self.parse_avc_pes(pes, true);
        } else if !self.video_pes.is_empty() {
            log::debug!("[tsdemuxer] last video PES truncated ({} bytes), keeping it", self.video_pes.len());
        }

        if let Some(pes) = self.audio_pes.take_complete() {
            self.parse_audio_pes(pes);
        } else if !self.audio_pes.is_empty() {
            log::warn!(
                "[tsdemuxer] last audio PES truncated ({} bytes), might overlap between fragments",
                self.audio_pes.len()
            );
        }

        if let Some(pes) = self.id3_pes.take_complete() {
            self.parse_id3_pes(pes);
        } else if !self.id3_pes.is_empty() {
            log::debug!("[tsdemuxer] last ID3 PES truncated ({} bytes), keeping it", self.id3_pes.len());
        }
    }

    fn parse_avc_pes(&mut self, pes: PESPacket, last: bool) {
        let split = split_annexb(&pes.data);
        if let Some(leading) = split.leading {
            self.append_to_last_unit(&leading);
        }

        // without delimiters a new PES with a timestamp starts the next access unit
        if !split.units.is_empty() && !self.aud_found && pes.pts.is_some() {
            if let Some(pending) = self.pending_avc.take() {
                if pending.frame {
                    self.push_access_unit(pending);
                    self.pending_avc = Some(PendingAccessUnit::new(&pes));
                } else {
                    self.pending_avc = Some(pending);
                }
            }
        }

        let mut sps_found = false;
        for unit in split.units {
            let Some(nal) = NALUnit::new(unit) else {
                continue;
            };
            let push = match nal.nal_type {
                1 => {
                    let sample = self.pending_avc.get_or_insert_with(|| PendingAccessUnit::new(&pes));
                    sample.frame = true;
                    if sps_found && nal.data.len() > 4 {
                        // I and SI slices make a random access point once an SPS was seen
                        if let Ok(2 | 4 | 7 | 9) = self.h264.read_slice_type(&nal.data) {
                            sample.key = true;
                        }
                    }
                    true
                }
                5 => {
                    let sample = self.pending_avc.get_or_insert_with(|| PendingAccessUnit::new(&pes));
                    sample.key = true;
                    sample.frame = true;
                    true
                }
                6 => {
                    match pes.pts {
                        Some(pts) => {
                            for payload in self.h264.parse_sei_captions(&nal.data) {
                                self.text.samples.push(TextSample { pts, payload });
                            }
                        }
                        None => log::debug!("[tsdemuxer] SEI in a PES without PTS, captions skipped"),
                    }
                    true
                }
                7 => {
                    sps_found = true;
                    if self.video.sps.is_none() {
                        match self.h264.parse_sps(&nal.data) {
                            Ok(info) => {
                                log::info!(
                                    "[tsdemuxer] video {}x{} {}",
                                    info.width,
                                    info.height,
                                    info.codec_string()
                                );
                                self.video.width = info.width;
                                self.video.height = info.height;
                                self.video.pixel_ratio = info.pixel_ratio;
                                self.video.codec = Some(info.codec_string());
                                self.video.sps = Some(nal.data.clone());
                            }
                            Err(e) => log::warn!("[tsdemuxer] unreadable SPS: {}", e),
                        }
                    }
                    true
                }
                8 => {
                    if self.video.pps.is_none() {
                        self.video.pps = Some(nal.data.clone());
                    }
                    true
                }
                9 => {
                    self.aud_found = true;
                    if let Some(pending) = self.pending_avc.take() {
                        self.push_access_unit(pending);
                    }
                    self.pending_avc = Some(PendingAccessUnit::new(&pes));
                    false
                }
                12 => true,
                other => {
                    log::trace!("[tsdemuxer] skipping NAL unit type {}", other);
                    false
                }
            };
            if push {
                if let Some(sample) = self.pending_avc.as_mut() {
                    sample.units.push(nal.data);
                }
            }
        }

        if last {
            if let Some(pending) = self.pending_avc.take() {
                self.push_access_unit(pending);
            }
        }
    }

    /// Bytes before the first start code of a PES finish the previous unit.
    fn append_to_last_unit(&mut self, tail: &[u8]) {
        let pending_has_units = self.pending_avc.as_ref().map_or(false, |p| !p.units.is_empty());
        let unit = if pending_has_units {
            self.pending_avc.as_mut().and_then(|p| p.units.last_mut())
        } else {
            self.video.samples.last_mut().and_then(|s| s.units.last_mut())
        };
        match unit {
            Some(unit) => {
                let mut joined = BytesMut::with_capacity(unit.len() + tail.len());
                joined.extend_from_slice(unit);
                joined.extend_from_slice(tail);
                *unit = joined.freeze();
            }
            None => log::warn!("[tsdemuxer] dropping {} bytes of a NAL unit with no start", tail.len()),
        }
    }

    fn push_access_unit(&mut self, pending: PendingAccessUnit) {
        if pending.units.is_empty() || !pending.frame {
            return;
        }
        let (pts, dts) = match (pending.pts, pending.dts) {
            (Some(pts), Some(dts)) => (pts, dts),
            _ => match self.last_avc_timing {
                Some(timing) => timing,
                None => {
                    self.video.dropped += 1;
                    return;
                }
            },
        };
        self.last_avc_timing = Some((pts, dts));
        self.video.samples.push(VideoSample {
            pts,
            dts,
            key: pending.key,
            frame: pending.frame,
            units: pending.units,
        });
    }

    fn parse_audio_pes(&mut self, pes: PESPacket) {
        let Some(codec) = self.audio_codec else {
            return;
        };
        let mut data = pes.data;
        let mut start = 0;
        let mut pts = pes.pts;

        if let Some(mut overflow) = self.audio_overflow.take() {
            match overflow.missing {
                None => {
                    overflow.frame.extend_from_slice(&data);
                    data = overflow.frame.freeze();
                    pts = Some(overflow.pts);
                }
                Some(missing) => {
                    let take = missing.min(data.len());
                    overflow.frame.extend_from_slice(&data[..take]);
                    if take < missing {
                        overflow.missing = Some(missing - take);
                        self.audio_overflow = Some(overflow);
                        return;
                    }
                    let frame = overflow.frame.freeze();
                    self.audio
                        .samples
                        .push(AudioSample::new(overflow.pts, frame.slice(overflow.header_length..)));
                    start = take;
                    if pts.is_none() {
                        pts = Some(overflow.pts + self.frame_duration().round() as i64);
                    }
                }
            }
        }

        let len = data.len();
        let mut offset = start;
        while offset + 1 < len && !is_frame_header(codec, &data, offset) {
            offset += 1;
        }
        if offset >= len || !is_frame_header(codec, &data, offset) {
            if start < len {
                log::warn!("[tsdemuxer] no {:?} frame header found in PES", codec);
            }
            return;
        }
        if offset != start {
            log::warn!("[tsdemuxer] {:?} PES did not start with a frame header, offset {}", codec, offset);
        }

        if !self.audio.is_configured() {
            match codec {
                AudioStreamCodec::Aac => {
                    aac::configure_track(&mut self.audio, &data, offset);
                }
                AudioStreamCodec::Mpeg => {
                    if let Ok(header) = mpeg_audio::parse_header(&data, offset) {
                        self.audio.samplerate = Some(header.sample_rate);
                        self.audio.channel_count = header.channel_count;
                        self.audio.codec = Some("mp3".to_owned());
                    }
                }
            }
        }

        let Some(pts) = pts else {
            log::warn!("[tsdemuxer] {:?} PES with unknown PTS", codec);
            return;
        };

        let mut index = 0u32;
        while offset < len {
            if !can_parse_frame(codec, &data, offset) {
                // header cut by the end of the PES
                self.audio_overflow = Some(AudioOverflow {
                    pts: pts + (index as f64 * self.frame_duration()).round() as i64,
                    frame: BytesMut::from(&data[offset..]),
                    header_length: 0,
                    missing: None,
                });
                break;
            }
            let frame = match codec {
                AudioStreamCodec::Aac => aac::read_frame(&self.audio, &data, offset, pts, index),
                AudioStreamCodec::Mpeg => mp3::read_frame(&data, offset, pts, index),
            };
            match frame {
                Some(Ok((length, sample))) => {
                    self.audio.samples.push(sample);
                    offset += length;
                    index += 1;
                }
                Some(Err(missing)) => {
                    let header_length = match codec {
                        AudioStreamCodec::Aac => adts::parse_adts_header(&data[offset..])
                            .map(|h| h.header_length())
                            .unwrap_or(adts::ADTS_HEADER_MIN),
                        AudioStreamCodec::Mpeg => 0,
                    };
                    self.audio_overflow = Some(AudioOverflow {
                        pts: pts + (index as f64 * self.frame_duration()).round() as i64,
                        frame: BytesMut::from(&data[offset..]),
                        header_length,
                        missing: Some(missing),
                    });
                    break;
                }
                None => offset += 1,
            }
            while offset + 1 < len && !is_frame_header(codec, &data, offset) {
                offset += 1;
            }
            if offset + 1 >= len {
                break;
            }
        }
    }

    /// Frame duration in 90 kHz ticks for the configured audio track.
    fn frame_duration(&self) -> f64 {
        match self.audio.samplerate {
            Some(rate) if rate > 0 => self.audio.frame_samples() as f64 * 90_000.0 / rate as f64,
            _ => 0.0,
        }
    }

    fn parse_id3_pes(&mut self, pes: PESPacket) {
        match pes.pts {
            Some(pts) => self.id3.samples.push(MetadataSample {
                pts,
                dts: pes.dts.unwrap_or(pts),
                data: pes.data,
            }),
            None => log::warn!("[tsdemuxer] ID3 PES with unknown PTS"),
        }
    }
}

impl Default for TSDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

fn is_frame_header(codec: AudioStreamCodec, data: &[u8], offset: usize) -> bool {
    match codec {
        AudioStreamCodec::Aac => adts::is_header(data, offset),
        AudioStreamCodec::Mpeg => mpeg_audio::is_header(data, offset),
    }
}

fn can_parse_frame(codec: AudioStreamCodec, data: &[u8], offset: usize) -> bool {
    match codec {
        AudioStreamCodec::Aac => adts::can_parse(data, offset),
        AudioStreamCodec::Mpeg => mpeg_audio::can_parse(data, offset),
    }
}

#[async_trait]
impl Demuxer for TSDemuxer {
    fn probe(data: &[u8]) -> bool {
        sync_offset(data).is_some()
    }

    fn demux(&mut self, data: Bytes, _time_offset: f64, _contiguous: bool) -> Result<DemuxerResult> {
        Ok(self.demux_packets(data, false, false))
    }

    /// SAMPLE-AES fragments are demuxed in one call and decrypted before
    /// returning; nothing is kept for `flush`.
    async fn demux_sample_aes(
        &mut self,
        data: Bytes,
        decrypt: &DecryptData,
        decrypter: &dyn Decrypter,
        _time_offset: f64,
        _contiguous: bool,
    ) -> Result<DemuxerResult> {
        let (key, iv) = decrypt
            .key_iv()
            .ok_or_else(|| HlsError::Decrypt("SAMPLE-AES fragment without key".into()))?;

        let mut result = self.demux_packets(data, true, true);
        if result.audio.is_aac {
            sample_aes::decrypt_audio_samples(&mut result.audio.samples, decrypter, key, iv).await?;
        }
        sample_aes::decrypt_video_samples(&mut result.video.samples, &mut self.h264, decrypter, key, iv).await?;
        Ok(result)
    }

    fn flush(&mut self, _time_offset: f64) -> Result<DemuxerResult> {
        let rest = self.cache.flush();
        if !rest.is_empty() {
            return Ok(self.demux_packets(rest, true, false));
        }
        self.extract_remaining();
        Ok(self.result())
    }

    fn reset_init_segment(&mut self, audio_codec: Option<&str>, video_codec: Option<&str>, duration: f64) {
        self.pmt_parsed = false;
        self.pmt_pid = None;
        self.audio_codec = None;

        self.video = VideoTrack::new(duration);
        self.video.manifest_codec = video_codec.map(str::to_owned);
        self.audio = AudioTrack::new(duration);
        self.audio.manifest_codec = audio_codec.map(str::to_owned);
        self.id3 = MetadataTrack::new();
        self.text = TextTrack::new();

        self.video_pes = PESAssembler::new();
        self.audio_pes = PESAssembler::new();
        self.id3_pes = PESAssembler::new();
        self.pending_avc = None;
        self.aud_found = false;
        self.last_avc_timing = None;
        self.audio_overflow = None;
        self.cache.reset();
    }

    fn reset_timestamp(&mut self, _default_init_pts: Option<i64>) {}

    fn reset_contiguity(&mut self) {
        self.video_pes = PESAssembler::new();
        self.audio_pes = PESAssembler::new();
        self.id3_pes = PESAssembler::new();
        self.pending_avc = None;
        self.audio_overflow = None;
        self.cache.reset();
    }
}
