use bytes::Bytes;
use std::marker::PhantomData;

use super::id3;
use super::{ChunkCache, DemuxerResult};
use crate::av::{AudioSample, AudioTrack, MetadataSample, MetadataTrack, TextTrack, VideoTrack, MPEG_TS_CLOCK};

/// Outcome of reading one frame.
pub(crate) enum FrameStatus {
    Complete { length: usize, sample: AudioSample },
    /// The frame runs past the end of the buffer.
    Incomplete,
    /// Not a usable frame header.
    Invalid,
}

/// Frame syntax of a packed audio format.
pub(crate) trait AudioFraming: Send + 'static {
    const NAME: &'static str;

    fn is_header(data: &[u8], offset: usize) -> bool;

    fn can_parse(data: &[u8], offset: usize) -> bool;

    /// Accepts `data` as this format after an optional leading ID3 tag.
    fn probe(data: &[u8]) -> bool {
        let mut offset = id3::get_id3_data(data, 0).map_or(0, <[u8]>::len);
        while offset < data.len() {
            if Self::probe_at(data, offset) {
                return true;
            }
            offset += 1;
        }
        false
    }

    fn probe_at(data: &[u8], offset: usize) -> bool;

    /// Fills codec fields of `track` from the frame at `offset`.
    fn init_track(track: &mut AudioTrack, data: &[u8], offset: usize);

    /// Parses the frame at `offset` stamped `base_pts + index * duration`.
    fn parse_frame(track: &AudioTrack, data: &Bytes, offset: usize, base_pts: i64, index: u32) -> FrameStatus;

    fn new_track(audio_codec: Option<&str>, duration: f64) -> AudioTrack;
}

/// Demuxer for packed audio: ID3 tags interleaved with audio frames, timed
/// from the transport stream timestamp of the first tag.
pub struct BaseAudioDemuxer<F: AudioFraming> {
    cache: ChunkCache,
    audio: AudioTrack,
    id3: MetadataTrack,
    base_pts: Option<i64>,
    last_pts: Option<i64>,
    frame_index: u32,
    init_pts: Option<i64>,
    framing: PhantomData<F>,
}

impl<F: AudioFraming> BaseAudioDemuxer<F> {
    pub fn new() -> Self {
        Self {
            cache: ChunkCache::new(),
            audio: F::new_track(None, 0.0),
            id3: MetadataTrack::new(),
            base_pts: None,
            last_pts: None,
            frame_index: 0,
            init_pts: None,
            framing: PhantomData,
        }
    }

    fn result(&mut self) -> DemuxerResult {
        DemuxerResult {
            audio: self.audio.take_samples(),
            video: VideoTrack::new(self.audio.duration),
            id3: self.id3.take_samples(),
            text: TextTrack::new(),
        }
    }

    pub(crate) fn demux_bytes(&mut self, data: Bytes, time_offset: f64) -> DemuxerResult {
        let data = self.cache.join(data);
        let length = data.len();

        if id3::is_header(&data, 0) && !id3::can_parse(&data, 0) {
            self.cache.push(&data);
            return self.result();
        }

        let mut tags = id3::get_id3_data(&data, 0).map(Bytes::copy_from_slice);
        let mut offset = tags.as_ref().map_or(0, Bytes::len);
        let timestamp = tags.as_deref().and_then(id3::get_timestamp);

        if self.base_pts.is_none() || (self.frame_index == 0 && timestamp.is_some()) {
            let base = timestamp.unwrap_or_else(|| {
                (time_offset * MPEG_TS_CLOCK as f64).round() as i64 + self.init_pts.unwrap_or(0)
            });
            log::debug!("[{}] base PTS {} (ID3 timestamp: {:?})", F::NAME, base, timestamp);
            self.base_pts = Some(base);
            self.last_pts = Some(base);
        }
        let base_pts = self.base_pts.unwrap_or_default();

        if let Some(tag) = tags.take() {
            let pts = self.last_pts.unwrap_or(base_pts);
            self.id3.samples.push(MetadataSample { pts, dts: pts, data: tag });
        }

        let mut last_data_index = offset;
        while offset < length {
            if F::can_parse(&data, offset) {
                if !self.audio.is_configured() {
                    F::init_track(&mut self.audio, &data, offset);
                }
                match F::parse_frame(&self.audio, &data, offset, base_pts, self.frame_index) {
                    FrameStatus::Complete { length, sample } => {
                        self.frame_index += 1;
                        self.last_pts = Some(sample.pts);
                        self.audio.samples.push(sample);
                        offset += length;
                        last_data_index = offset;
                    }
                    FrameStatus::Incomplete => break,
                    FrameStatus::Invalid => {
                        offset += 1;
                        last_data_index = offset;
                    }
                }
            } else if id3::can_parse(&data, offset) {
                if let Some(tag) = id3::get_id3_data(&data, offset) {
                    let pts = self.last_pts.unwrap_or(base_pts);
                    offset += tag.len();
                    self.id3.samples.push(MetadataSample {
                        pts,
                        dts: pts,
                        data: Bytes::copy_from_slice(tag),
                    });
                    last_data_index = offset;
                } else {
                    offset += 1;
                }
            } else if F::is_header(&data, offset) || id3::is_header(&data, offset) {
                // a unit starts here but is not complete yet
                break;
            } else {
                offset += 1;
            }
        }

        if last_data_index < length {
            self.cache.push(&data[last_data_index..]);
        }
        self.result()
    }

    pub(crate) fn flush_bytes(&mut self) -> DemuxerResult {
        if !self.cache.is_empty() {
            let rest = self.cache.flush();
            let result = self.demux_bytes(rest, 0.0);
            if !self.cache.is_empty() {
                log::warn!(
                    "[{}] dropping {} trailing bytes that do not form a frame",
                    F::NAME,
                    self.cache.len()
                );
                self.cache.reset();
            }
            self.frame_index = 0;
            return result;
        }
        self.frame_index = 0;
        self.result()
    }

    pub(crate) fn reset_init(&mut self, audio_codec: Option<&str>, duration: f64) {
        self.audio = F::new_track(audio_codec, duration);
        self.id3 = MetadataTrack::new();
    }

    pub(crate) fn reset_time(&mut self, default_init_pts: Option<i64>) {
        self.init_pts = default_init_pts;
        self.reset_contiguity_state();
    }

    pub(crate) fn reset_contiguity_state(&mut self) {
        self.base_pts = None;
        self.last_pts = None;
        self.frame_index = 0;
        self.cache.reset();
    }
}

impl<F: AudioFraming> Default for BaseAudioDemuxer<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Implements [`super::Demuxer`] for a framing on top of [`BaseAudioDemuxer`].
macro_rules! impl_audio_demuxer {
    ($framing:ty) => {
        #[async_trait::async_trait]
        impl $crate::format::Demuxer for $crate::format::base_audio::BaseAudioDemuxer<$framing> {
            fn probe(data: &[u8]) -> bool {
                <$framing as $crate::format::base_audio::AudioFraming>::probe(data)
            }

            fn demux(
                &mut self,
                data: bytes::Bytes,
                time_offset: f64,
                _contiguous: bool,
            ) -> $crate::Result<$crate::format::DemuxerResult> {
                Ok(self.demux_bytes(data, time_offset))
            }

            async fn demux_sample_aes(
                &mut self,
                _data: bytes::Bytes,
                _decrypt: &$crate::transmux::DecryptData,
                _decrypter: &dyn $crate::transmux::Decrypter,
                _time_offset: f64,
                _contiguous: bool,
            ) -> $crate::Result<$crate::format::DemuxerResult> {
                Err($crate::HlsError::Unsupported(format!(
                    "SAMPLE-AES is not supported for {} segments",
                    <$framing as $crate::format::base_audio::AudioFraming>::NAME
                )))
            }

            fn flush(&mut self, _time_offset: f64) -> $crate::Result<$crate::format::DemuxerResult> {
                Ok(self.flush_bytes())
            }

            fn reset_init_segment(&mut self, audio_codec: Option<&str>, _video_codec: Option<&str>, duration: f64) {
                self.reset_init(audio_codec, duration);
            }

            fn reset_timestamp(&mut self, default_init_pts: Option<i64>) {
                self.reset_time(default_init_pts);
            }

            fn reset_contiguity(&mut self) {
                self.reset_contiguity_state();
            }
        }
    };
}

pub(crate) use impl_audio_demuxer;
