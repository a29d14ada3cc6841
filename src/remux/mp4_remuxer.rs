use bytes::{BufMut, Bytes};

use super::generator::{self, Mp4Sample, AUDIO_TRACK_ID, MDAT_HEADER_SIZE, VIDEO_TRACK_ID};
use super::timestamp::{pts_normalize, seconds_to_ticks};
use super::{InitSegmentData, InitTrack, RemuxedTrack, Remuxer, RemuxerResult, TimedMetadata, TimedUserdata, TrackSet};
use crate::av::{AudioSample, AudioTrack, MetadataTrack, TextTrack, VideoSample, VideoTrack};
use crate::buffer::SinkKind;
use crate::codec::aac;
use crate::config::{HlsConfig, RemuxConfig};
use crate::events::{self, ErrorData, ErrorDetails, ErrorType, EventSender, HlsEvent};

/// Gaps longer than this are not filled with silence.
const MAX_SILENT_FRAME_DURATION_MS: f64 = 10_000.0;

/// Largest PTS < DTS skew corrected by shifting DTS (200 ms at 90 kHz).
const MAX_PTS_DTS_SHIFT: i64 = -18_000;

/// Remuxes elementary samples into fragmented MP4.
///
/// Owns the output timeline: `init_pts`/`init_dts` map input timestamps to
/// zero-based output time, `next_avc_dts`/`next_audio_pts` say where the
/// next contiguous samples must start. Audio is handled before video so
/// the video pass can stretch its last frame toward the audio end.
pub struct MP4Remuxer {
    config: RemuxConfig,
    max_buffer_hole: f64,
    events: EventSender,
    init_segment_generated: bool,
    audio_initialized: bool,
    video_initialized: bool,
    init_pts: Option<i64>,
    init_dts: Option<i64>,
    next_avc_dts: Option<i64>,
    next_audio_pts: Option<i64>,
    audio_sequence: u32,
    video_sequence: u32,
    /// Samples demuxed but not remuxable yet, prepended to the next call.
    held_audio: Vec<AudioSample>,
    held_video: Vec<VideoSample>,
    /// Set while the last samples of a fragment are remuxed.
    flushing: bool,
    fragment_has_audio: bool,
    /// Output DTS range of the video remuxed for the current fragment.
    fragment_video_span: Option<(f64, f64)>,
}

impl MP4Remuxer {
    pub fn new(config: &HlsConfig, events: EventSender) -> Self {
        Self {
            config: config.remux.clone(),
            max_buffer_hole: config.max_buffer_hole,
            events,
            init_segment_generated: false,
            audio_initialized: false,
            video_initialized: false,
            init_pts: None,
            init_dts: None,
            next_avc_dts: None,
            next_audio_pts: None,
            audio_sequence: 0,
            video_sequence: 0,
            held_audio: Vec::new(),
            held_video: Vec::new(),
            flushing: false,
            fragment_has_audio: false,
            fragment_video_span: None,
        }
    }

    pub fn init_pts(&self) -> Option<i64> {
        self.init_pts
    }

    fn generate_init_segment(&mut self, audio: &AudioTrack, video: &VideoTrack, time_offset: f64) -> Option<InitSegmentData> {
        let compute_baseline = self.init_pts.is_none();
        let mut init_pts: Option<i64> = None;
        let mut init_dts: Option<i64> = None;
        let mut tracks = TrackSet::default();

        if let (Some(samplerate), Some(first)) = (audio.samplerate, audio.samples.first()) {
            if audio.is_configured() {
                log::debug!("[mp4-remuxer] audio sampling rate: {}", samplerate);
                tracks.audio = Some(InitTrack {
                    container: "audio/mp4",
                    codec: audio.codec.clone().unwrap_or_default(),
                    init_segment: generator::audio_init_segment(audio, samplerate),
                    channel_count: Some(audio.channel_count),
                    width: None,
                    height: None,
                });
                if compute_baseline {
                    let pts = first.pts - seconds_to_ticks(time_offset, audio.input_timescale);
                    init_pts = Some(pts);
                    init_dts = Some(pts);
                }
            }
        }

        if let Some(first) = video.samples.first() {
            if video.is_configured() {
                let codec = video
                    .codec
                    .clone()
                    .or_else(|| video.manifest_codec.clone())
                    .unwrap_or_else(|| "avc1.42e01e".into());
                tracks.video = Some(InitTrack {
                    container: "video/mp4",
                    codec,
                    init_segment: generator::video_init_segment(video, video.input_timescale),
                    channel_count: None,
                    width: Some(video.width),
                    height: Some(video.height),
                });
                if compute_baseline {
                    let offset = seconds_to_ticks(time_offset, video.input_timescale);
                    init_pts = Some(init_pts.map_or(first.pts - offset, |p| p.min(first.pts - offset)));
                    init_dts = Some(init_dts.map_or(first.dts - offset, |d| d.min(first.dts - offset)));
                }
            }
        }

        if tracks.is_empty() {
            return None;
        }

        self.init_segment_generated = true;
        self.audio_initialized |= tracks.audio.is_some();
        self.video_initialized |= tracks.video.is_some();
        if compute_baseline {
            log::info!("[mp4-remuxer] initPTS {:?}, initDTS {:?}", init_pts, init_dts);
            self.init_pts = init_pts;
            self.init_dts = init_dts;
        }

        Some(InitSegmentData {
            tracks,
            init_pts: if compute_baseline { init_pts } else { None },
        })
    }

    /// Emits an init segment for a track that showed up after the first one.
    fn regenerate_init_segment(
        &mut self,
        audio: &AudioTrack,
        video: &VideoTrack,
        time_offset: f64,
        kind: SinkKind,
    ) -> Option<InitSegmentData> {
        log::warn!("[mp4-remuxer] regenerating init segment as {:?} was detected", kind);
        let mut init = self.generate_init_segment(audio, video, time_offset)?;
        match kind {
            SinkKind::Audio => init.tracks.video = None,
            _ => init.tracks.audio = None,
        }
        if init.tracks.is_empty() {
            log::debug!("[mp4-remuxer] no {:?} track to regenerate the init segment with", kind);
            return None;
        }
        Some(init)
    }

    fn allocate_mdat(&self, size: usize, kind: &str) -> Option<Vec<u8>> {
        let mut mdat = Vec::new();
        if mdat.try_reserve_exact(size).is_err() {
            log::error!("[mp4-remuxer] failed allocating {} mdat of {} bytes", kind, size);
            events::emit(
                &self.events,
                HlsEvent::Error(
                    ErrorData::new(
                        ErrorType::MuxError,
                        ErrorDetails::RemuxAllocError,
                        false,
                        format!("fail allocating {} mdat {}", kind, size),
                    )
                    .with_bytes(size),
                ),
            );
            return None;
        }
        mdat.resize(MDAT_HEADER_SIZE, 0);
        generator::put_mdat_header(&mut mdat, size);
        Some(mdat)
    }

    fn remux_video(
        &mut self,
        track: &mut VideoTrack,
        time_offset: f64,
        contiguous: bool,
        audio_track_length: f64,
    ) -> Option<RemuxedTrack> {
        let timescale = track.input_timescale;
        let ticks = timescale as f64;
        let init_pts = self.init_pts.unwrap_or(0);
        let mut samples = std::mem::take(&mut track.samples);
        if samples.is_empty() {
            return None;
        }

        let next_avc_dts = match self.next_avc_dts {
            Some(dts) => dts,
            None => {
                let dts = seconds_to_ticks(time_offset, timescale);
                log::debug!("[mp4-remuxer] nextAvcDts generated as {}", dts);
                self.next_avc_dts = Some(dts);
                dts
            }
        };

        for sample in samples.iter_mut() {
            sample.pts = pts_normalize(sample.pts - init_pts, Some(next_avc_dts));
            sample.dts = pts_normalize(sample.dts - init_pts, Some(next_avc_dts));
        }
        samples.sort_by_key(|s| s.dts);

        let shift = samples
            .iter()
            .fold(0, |shift, s| shift.min(s.pts - s.dts).max(MAX_PTS_DTS_SHIFT));
        if shift < 0 {
            log::debug!("[mp4-remuxer] PTS < DTS detected, shifting DTS by {} ms", shift / 90);
            samples.iter_mut().for_each(|s| s.dts += shift);
        }

        let mut first_dts = samples[0].dts.max(0);
        let delta = first_dts - next_avc_dts;
        let millisecond_delta = (delta as f64 / 90.0).round() as i64;
        if contiguous && millisecond_delta != 0 {
            if millisecond_delta > 1 {
                log::info!("[mp4-remuxer] AVC: {} ms hole between fragments detected, filling it", millisecond_delta);
            } else if millisecond_delta < -1 {
                log::info!("[mp4-remuxer] AVC: {} ms overlapping between fragments detected", -millisecond_delta);
            }
            first_dts = next_avc_dts;
            samples[0].dts = first_dts;
            samples[0].pts = (samples[0].pts - delta).max(next_avc_dts);
        }

        let last_dts = samples[samples.len() - 1].dts.max(0);
        let min_pts = samples.iter().map(|s| s.pts).min().unwrap_or(first_dts);
        let max_pts = samples.iter().map(|s| s.pts).max().unwrap_or(first_dts);

        let mut nb_nalu = 0;
        let mut nalu_len = 0;
        for sample in samples.iter_mut() {
            nb_nalu += sample.units.len();
            nalu_len += sample.len();
            sample.dts = sample.dts.max(first_dts);
            sample.pts = sample.pts.max(sample.dts);
        }

        let mdat_size = nalu_len + 4 * nb_nalu + MDAT_HEADER_SIZE;
        let mut mdat = self.allocate_mdat(mdat_size, "video")?;

        let mut output = Vec::with_capacity(samples.len());
        let mut sample_duration = 0;
        for (i, sample) in samples.iter().enumerate() {
            let mut length = 0;
            for unit in &sample.units {
                mdat.put_u32(unit.len() as u32);
                mdat.extend_from_slice(unit);
                length += 4 + unit.len();
            }

            sample_duration = match samples.get(i + 1) {
                Some(next) => next.dts - sample.dts,
                None => {
                    let last_frame_duration = sample.dts - samples[i.saturating_sub(1)].dts;
                    self.last_frame_duration(last_frame_duration, sample.pts, min_pts, audio_track_length, ticks)
                }
            };
            output.push(Mp4Sample::new(
                sample.key,
                sample_duration as u32,
                length as u32,
                (sample.pts - sample.dts) as u32,
            ));
        }

        let next_dts = last_dts + sample_duration;
        self.next_avc_dts = Some(next_dts);

        let moof = generator::moof(self.video_sequence, first_dts as u64, VIDEO_TRACK_ID, &output);
        self.video_sequence += 1;
        let dropped = std::mem::take(&mut track.dropped);

        Some(RemuxedTrack {
            moof,
            mdat: Bytes::from(mdat),
            start_pts: min_pts as f64 / ticks,
            end_pts: (max_pts + sample_duration) as f64 / ticks,
            start_dts: first_dts as f64 / ticks,
            end_dts: next_dts as f64 / ticks,
            kind: SinkKind::Video,
            has_audio: false,
            has_video: true,
            samples: output.len(),
            dropped,
        })
    }

    /// Duration of the last video frame, stretched toward the end of the
    /// audio when the gap would exceed `max_buffer_hole`.
    fn last_frame_duration(&self, previous: i64, pts: i64, min_pts: i64, audio_track_length: f64, ticks: f64) -> i64 {
        let Some(next_audio_pts) = self.next_audio_pts.filter(|_| self.config.stretch_short_video_track) else {
            return previous;
        };
        let gap_tolerance = (self.max_buffer_hole * ticks).floor() as i64;
        let audio_end = if audio_track_length > 0.0 {
            min_pts + (audio_track_length * ticks).round() as i64
        } else {
            next_audio_pts
        };
        let delta_to_frame_end = audio_end - pts;
        if delta_to_frame_end <= gap_tolerance {
            return previous;
        }

        let stretched = delta_to_frame_end - previous;
        let duration = if stretched < 0 { previous } else { stretched };
        log::debug!(
            "[mp4-remuxer] {} ms to the next segment; using {} ms for the last video frame",
            delta_to_frame_end / 90,
            duration / 90
        );
        duration
    }

    fn silent_frame(track: &AudioTrack) -> Option<Bytes> {
        let codec = track.manifest_codec.as_deref().or(track.codec.as_deref())?;
        aac::silent_frame(codec, track.channel_count)
    }

    fn remux_audio(
        &mut self,
        track: &mut AudioTrack,
        time_offset: f64,
        contiguous: bool,
        accurate_time_offset: bool,
    ) -> Option<RemuxedTrack> {
        let input_timescale = track.input_timescale;
        let ticks = input_timescale as f64;
        let Some(samplerate) = track.samplerate else {
            log::debug!(
                "[mp4-remuxer] audio sample rate unknown, keeping {} samples back",
                track.samples.len()
            );
            return None;
        };
        let scale_factor = ticks / samplerate as f64;
        let mp4_sample_duration = track.frame_samples();
        let input_sample_duration = mp4_sample_duration as f64 * scale_factor;
        let init_pts = self.init_pts.unwrap_or(0);
        let offset_ticks = seconds_to_ticks(time_offset, input_timescale);
        let mut samples = std::mem::take(&mut track.samples);

        let contiguous = contiguous
            || match (samples.first(), self.next_audio_pts) {
                (Some(first), Some(next)) if next != 0 => {
                    (accurate_time_offset && (time_offset - next as f64 / ticks).abs() < 0.1)
                        || (((first.pts - next - init_pts).abs()) as f64) < 20.0 * input_sample_duration
                }
                _ => false,
            };

        for sample in samples.iter_mut() {
            sample.pts = pts_normalize(sample.pts - init_pts, Some(offset_ticks));
            sample.dts = sample.pts;
        }
        // negative PTS would shift everything after them forward
        samples.retain(|s| s.pts >= 0);
        let first_pts = samples.first()?.pts;

        let next_audio_pts = match self.next_audio_pts {
            Some(pts) => pts,
            None => {
                let pts = if accurate_time_offset { offset_ticks } else { first_pts };
                log::debug!("[mp4-remuxer] nextAudioPts generated as {}", pts);
                self.next_audio_pts = Some(pts);
                pts
            }
        };

        let silent = Self::silent_frame(track);
        if track.is_aac {
            samples = self.fill_audio_gaps(samples, next_audio_pts, input_sample_duration, ticks, silent.as_ref());
        }

        let mut units: Vec<Bytes> = Vec::with_capacity(samples.len());
        let mut output: Vec<Mp4Sample> = Vec::with_capacity(samples.len());
        let mut first_pts: Option<i64> = None;
        let mut last_pts: Option<i64> = None;

        for sample in samples {
            let mut pts = sample.pts;
            match last_pts {
                Some(last) => {
                    if let Some(previous) = output.last_mut() {
                        previous.duration = ((pts - last) as f64 / scale_factor).round() as u32;
                    }
                }
                None => {
                    if contiguous && track.is_aac {
                        let delta = pts - next_audio_pts;
                        let delta_ms = (1000.0 * delta as f64 / ticks).round();
                        if delta_ms > 0.0 && delta_ms < MAX_SILENT_FRAME_DURATION_MS {
                            let missing = (delta as f64 / input_sample_duration).floor() as usize;
                            log::debug!("[mp4-remuxer] {} ms hole between AAC samples detected, filling it", delta_ms);
                            let fill = silent.clone().unwrap_or_else(|| sample.unit.clone());
                            for _ in 0..missing {
                                output.push(Mp4Sample::new(true, mp4_sample_duration, fill.len() as u32, 0));
                                units.push(fill.clone());
                            }
                            first_pts = Some(next_audio_pts);
                            pts = next_audio_pts + (missing as f64 * input_sample_duration).round() as i64;
                        } else if delta_ms < -12.0 {
                            log::debug!(
                                "[mp4-remuxer] dropping overlapping AAC sample, expected/parsed/delta: {:.3}s/{:.3}s/{}ms",
                                next_audio_pts as f64 / ticks,
                                pts as f64 / ticks,
                                -delta_ms
                            );
                            continue;
                        } else {
                            pts = next_audio_pts;
                        }
                    }
                    first_pts.get_or_insert(pts);
                }
            }
            output.push(Mp4Sample::new(true, mp4_sample_duration, sample.unit.len() as u32, 0));
            units.push(sample.unit);
            last_pts = Some(pts);
        }

        // everything may have overlapped the previous fragment
        let (first_pts, last_pts, last) = (first_pts?, last_pts?, output.last()?);
        let next_pts = last_pts + (scale_factor * last.duration as f64).round() as i64;
        self.next_audio_pts = Some(next_pts);

        let mdat_size = MDAT_HEADER_SIZE + units.iter().map(Bytes::len).sum::<usize>();
        let mut mdat = self.allocate_mdat(mdat_size, "audio")?;
        units.iter().for_each(|unit| mdat.extend_from_slice(unit));

        let base_time = (first_pts as f64 / scale_factor).round().max(0.0) as u64;
        let moof = generator::moof(self.audio_sequence, base_time, AUDIO_TRACK_ID, &output);
        self.audio_sequence += 1;

        let start = first_pts as f64 / ticks;
        let end = next_pts as f64 / ticks;
        Some(RemuxedTrack {
            moof,
            mdat: Bytes::from(mdat),
            start_pts: start,
            end_pts: end,
            start_dts: start,
            end_dts: end,
            kind: SinkKind::Audio,
            has_audio: true,
            has_video: false,
            samples: output.len(),
            dropped: 0,
        })
    }

    /// Drops frames overlapping the expected timeline, injects silence into
    /// gaps and snaps the rest onto the expected PTS grid.
    fn fill_audio_gaps(
        &self,
        samples: Vec<AudioSample>,
        next_audio_pts: i64,
        input_sample_duration: f64,
        ticks: f64,
        silent: Option<&Bytes>,
    ) -> Vec<AudioSample> {
        let drift = self.config.max_audio_frames_drift;
        let mut next_pts = next_audio_pts as f64;
        let mut corrected = Vec::with_capacity(samples.len());

        for mut sample in samples {
            let delta = sample.pts as f64 - next_pts;
            let duration_ms = (1000.0 * delta / ticks).abs();

            if delta <= -drift * input_sample_duration {
                log::warn!(
                    "[mp4-remuxer] dropping 1 audio frame @ {:.3}s due to {} ms overlap",
                    next_pts / ticks,
                    duration_ms.round()
                );
                continue;
            }

            if delta >= drift * input_sample_duration && duration_ms < MAX_SILENT_FRAME_DURATION_MS && next_pts != 0.0 {
                let missing = (delta / input_sample_duration).floor() as usize;
                log::warn!(
                    "[mp4-remuxer] injecting {} audio frames @ {:.3}s due to {} ms gap",
                    missing,
                    next_pts / ticks,
                    duration_ms.round()
                );
                let fill = match silent {
                    Some(frame) => frame.clone(),
                    None => {
                        log::warn!("[mp4-remuxer] no silent frame for this audio codec, duplicating the current frame");
                        sample.unit.clone()
                    }
                };
                for _ in 0..missing {
                    let stamp = next_pts.max(0.0).round() as i64;
                    corrected.push(AudioSample::new(stamp, fill.clone()));
                    next_pts += input_sample_duration;
                }
            }

            sample.pts = next_pts.round() as i64;
            sample.dts = sample.pts;
            next_pts += input_sample_duration;
            corrected.push(sample);
        }
        corrected
    }

    /// Silent audio up to the end of the video spanning `start_dts..end_dts`
    /// (seconds), for fragments that carry no audio although an audio track
    /// was set up.
    pub fn remux_empty_audio(
        &mut self,
        track: &mut AudioTrack,
        time_offset: f64,
        start_dts: f64,
        end_dts: f64,
    ) -> Option<RemuxedTrack> {
        let ticks = track.input_timescale as f64;
        let mp4_timescale = track.samplerate.unwrap_or(track.input_timescale) as f64;
        let frame_duration = ticks / mp4_timescale * aac::AAC_SAMPLES_PER_FRAME as f64;
        let init_dts = self.init_dts.unwrap_or(0) as f64;
        let start = self.next_audio_pts.map_or(start_dts * ticks, |p| p as f64) + init_dts;
        let end = end_dts * ticks + init_dts;
        let count = ((end - start) / frame_duration).ceil().max(0.0) as usize;

        let Some(silent) = Self::silent_frame(track) else {
            log::trace!("[mp4-remuxer] no silent frame for this audio codec, cannot remux empty audio");
            return None;
        };
        log::warn!("[mp4-remuxer] remuxing {} silent audio frames", count);

        track.samples = (0..count)
            .map(|i| AudioSample::new((start + i as f64 * frame_duration).round() as i64, silent.clone()))
            .collect();
        self.remux_audio(track, time_offset, true, false)
    }

    fn remux_id3(&self, track: MetadataTrack) -> Vec<TimedMetadata> {
        let ticks = track.input_timescale as f64;
        let init_pts = self.init_pts.unwrap_or(0);
        let init_dts = self.init_dts.unwrap_or(0);
        track
            .samples
            .into_iter()
            .map(|s| TimedMetadata {
                pts: (s.pts - init_pts) as f64 / ticks,
                dts: (s.dts - init_dts) as f64 / ticks,
                data: s.data,
            })
            .collect()
    }

    fn remux_text(&self, track: TextTrack) -> Vec<TimedUserdata> {
        let ticks = track.input_timescale as f64;
        let init_pts = self.init_pts.unwrap_or(0);
        let mut samples = track.samples;
        samples.sort_by_key(|s| s.pts);
        samples
            .into_iter()
            .map(|s| TimedUserdata {
                pts: (s.pts - init_pts) as f64 / ticks,
                payload: s.payload,
            })
            .collect()
    }
}

/// Removes samples in front of the first key frame; returns how many.
fn drop_samples_until_keyframe(track: &mut VideoTrack) -> usize {
    let dropped = track.samples.iter().take_while(|s| !s.key).count();
    if dropped > 0 {
        track.samples.drain(..dropped);
        track.dropped += dropped as u32;
    }
    dropped
}

impl Remuxer for MP4Remuxer {
    /// Contiguity is carried by the expected next timestamps; the caller
    /// breaks it with [`Remuxer::reset_next_timestamp`].
    fn remux(
        &mut self,
        mut audio: AudioTrack,
        mut video: VideoTrack,
        id3: MetadataTrack,
        text: TextTrack,
        time_offset: f64,
        _contiguous: bool,
        accurate_time_offset: bool,
    ) -> RemuxerResult {
        let mut result = RemuxerResult::default();
        if !self.held_audio.is_empty() {
            let mut held = std::mem::take(&mut self.held_audio);
            held.append(&mut audio.samples);
            audio.samples = held;
        }
        if !self.held_video.is_empty() {
            let mut held = std::mem::take(&mut self.held_video);
            held.append(&mut video.samples);
            video.samples = held;
        }
        self.fragment_has_audio |= !audio.samples.is_empty();
        let is_audio_contiguous = self.next_audio_pts.is_some();
        let is_video_contiguous = self.next_avc_dts.is_some();

        if !is_video_contiguous && self.config.force_key_frame_on_discontinuity {
            let total = video.samples.len();
            let dropped = drop_samples_until_keyframe(&mut video);
            if dropped > 0 {
                log::warn!(
                    "[mp4-remuxer] dropped {} out of {} video samples due to a missing keyframe",
                    dropped,
                    total
                );
            }
        }

        // wait for both tracks of a muxed stream before the first init segment
        let has_audio = audio.pid.is_some();
        let has_video = video.pid.is_some();
        let enough_audio = !audio.samples.is_empty();
        let enough_video = video.samples.len() > 1 || (self.flushing && !video.samples.is_empty());
        let can_remux = ((!has_audio || enough_audio) && (!has_video || enough_video)) || self.init_segment_generated;

        if can_remux {
            if !self.init_segment_generated {
                result.init_segment = self.generate_init_segment(&audio, &video, time_offset);
            }

            if self.init_segment_generated {
                if enough_audio {
                    if !self.audio_initialized {
                        result.init_segment = self
                            .regenerate_init_segment(&audio, &video, time_offset, SinkKind::Audio)
                            .or(result.init_segment.take());
                    }
                    result.audio = self.remux_audio(&mut audio, time_offset, is_audio_contiguous, accurate_time_offset);
                    if enough_video {
                        let audio_length = result.audio.as_ref().map_or(0.0, |a| a.end_pts - a.start_pts);
                        if !self.video_initialized {
                            result.init_segment = self
                                .regenerate_init_segment(&audio, &video, time_offset, SinkKind::Video)
                                .or(result.init_segment.take());
                        }
                        result.video = self.remux_video(&mut video, time_offset, is_video_contiguous, audio_length);
                    }
                } else if enough_video {
                    if !self.video_initialized {
                        result.init_segment = self
                            .regenerate_init_segment(&audio, &video, time_offset, SinkKind::Video)
                            .or(result.init_segment.take());
                    }
                    result.video = self.remux_video(&mut video, time_offset, is_video_contiguous, 0.0);
                }
            }
        }

        if let Some(video_data) = result.video.as_ref() {
            let start = self.fragment_video_span.map_or(video_data.start_dts, |(start, _)| start);
            self.fragment_video_span = Some((start, video_data.end_dts));
        }

        self.held_audio = std::mem::take(&mut audio.samples);
        self.held_video = std::mem::take(&mut video.samples);
        if !self.held_audio.is_empty() || !self.held_video.is_empty() {
            log::trace!(
                "[mp4-remuxer] holding {} audio and {} video samples for the next chunk",
                self.held_audio.len(),
                self.held_video.len()
            );
        }

        if self.init_segment_generated {
            if !id3.samples.is_empty() {
                result.id3 = Some(self.remux_id3(id3));
            }
            if !text.samples.is_empty() {
                result.text = Some(self.remux_text(text));
            }
        }
        result
    }

    /// Audio is synthesised only here, once the whole fragment is known to
    /// carry none: a chunk without audio may be followed by one with it.
    fn flush(
        &mut self,
        audio: AudioTrack,
        video: VideoTrack,
        id3: MetadataTrack,
        text: TextTrack,
        time_offset: f64,
        accurate_time_offset: bool,
    ) -> RemuxerResult {
        let mut silence_track = audio;
        let audio = silence_track.take_samples();

        self.flushing = true;
        let mut result = self.remux(audio, video, id3, text, time_offset, true, accurate_time_offset);
        self.flushing = false;

        let had_audio = std::mem::take(&mut self.fragment_has_audio);
        let video_span = self.fragment_video_span.take();
        if let Some((start, end)) = video_span.filter(|_| !had_audio && self.audio_initialized) {
            result.audio = self.remux_empty_audio(&mut silence_track, time_offset, start, end);
        }
        result
    }

    fn reset_init_segment(&mut self, _init_segment: Option<Bytes>, _audio_codec: Option<&str>, _video_codec: Option<&str>) {
        log::debug!("[mp4-remuxer] init segment flag reset");
        self.held_audio.clear();
        self.held_video.clear();
        self.fragment_has_audio = false;
        self.fragment_video_span = None;
        self.init_segment_generated = false;
        self.audio_initialized = false;
        self.video_initialized = false;
    }

    fn reset_timestamp(&mut self, default_init_pts: Option<i64>) {
        log::debug!("[mp4-remuxer] initPTS & initDTS reset");
        self.init_pts = default_init_pts;
        self.init_dts = default_init_pts;
    }

    fn reset_next_timestamp(&mut self) {
        log::debug!("[mp4-remuxer] nextAudioPts & nextAvcDts reset");
        // held samples belong to the broken timeline
        self.held_audio.clear();
        self.held_video.clear();
        self.fragment_has_audio = false;
        self.fragment_video_span = None;
        self.next_audio_pts = None;
        self.next_avc_dts = None;
    }
}
