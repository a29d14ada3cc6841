use async_trait::async_trait;
use bytes::Bytes;

use super::boxes::{complete_boxes_len, find_box};
use crate::av::{AudioTrack, MetadataTrack, TextTrack, VideoTrack};
use crate::format::{ChunkCache, Demuxer, DemuxerResult};
use crate::transmux::{DecryptData, Decrypter};
use crate::{HlsError, Result};

/// How far into a segment the probe looks for a `moof`.
const PROBE_WINDOW: usize = 16 * 1024;

/// Hands complete top-level boxes through in [`VideoTrack::fmp4_data`].
///
/// A box cut by the end of a chunk waits in the cache for the rest of it.
pub struct MP4Demuxer {
    cache: ChunkCache,
    video: VideoTrack,
    audio: AudioTrack,
    id3: MetadataTrack,
    text: TextTrack,
}

impl MP4Demuxer {
    pub fn new() -> Self {
        Self {
            cache: ChunkCache::new(),
            video: VideoTrack::new(0.0),
            audio: AudioTrack::new(0.0),
            id3: MetadataTrack::new(),
            text: TextTrack::new(),
        }
    }

    fn result(&mut self, boxes: Option<Bytes>) -> DemuxerResult {
        let mut video = self.video.take_samples();
        video.fmp4_data = boxes;
        DemuxerResult {
            audio: self.audio.take_samples(),
            video,
            id3: self.id3.take_samples(),
            text: self.text.take_samples(),
        }
    }
}

impl Default for MP4Demuxer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Demuxer for MP4Demuxer {
    fn probe(data: &[u8]) -> bool {
        let window = &data[..data.len().min(PROBE_WINDOW)];
        !find_box(window, &[b"moof"]).is_empty()
    }

    fn demux(&mut self, data: Bytes, _time_offset: f64, _contiguous: bool) -> Result<DemuxerResult> {
        let data = self.cache.join(data);
        let complete = complete_boxes_len(&data);
        if complete < data.len() {
            log::trace!("[mp4-demuxer] keeping {} bytes of a partial box", data.len() - complete);
            self.cache.push(&data[complete..]);
        }
        let boxes = (complete > 0).then(|| data.slice(..complete));
        Ok(self.result(boxes))
    }

    async fn demux_sample_aes(
        &mut self,
        _data: Bytes,
        _decrypt: &DecryptData,
        _decrypter: &dyn Decrypter,
        _time_offset: f64,
        _contiguous: bool,
    ) -> Result<DemuxerResult> {
        Err(HlsError::Unsupported("SAMPLE-AES in fMP4 segments".into()))
    }

    fn flush(&mut self, _time_offset: f64) -> Result<DemuxerResult> {
        let rest = self.cache.flush();
        if !rest.is_empty() {
            log::warn!("[mp4-demuxer] dropping {} trailing bytes that do not form a box", rest.len());
        }
        Ok(self.result(None))
    }

    fn reset_init_segment(&mut self, audio_codec: Option<&str>, video_codec: Option<&str>, duration: f64) {
        self.video = VideoTrack::new(duration);
        self.video.manifest_codec = video_codec.map(str::to_owned);
        self.audio = AudioTrack::new(duration);
        self.audio.manifest_codec = audio_codec.map(str::to_owned);
        self.cache.reset();
    }

    fn reset_timestamp(&mut self, _default_init_pts: Option<i64>) {}

    fn reset_contiguity(&mut self) {
        self.cache.reset();
    }
}
