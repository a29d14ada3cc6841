//! # Segment demuxers
//!
//! A [`Demuxer`] turns raw segment bytes into timestamped elementary samples.
//! Chunks may split a unit (TS packet, audio frame, MP4 box) anywhere; the
//! trailing part is kept and prefixed to the next chunk, so feeding a segment
//! in pieces yields the same samples as feeding it whole.
//!
//! [`DemuxerKind::probe`] picks the implementation for a segment, trying TS,
//! fMP4, ADTS/AAC and MPEG audio in that order.
//!
//! ```rust
//! use hlsio::format::DemuxerKind;
//!
//! let mut packed_audio = vec![0xFF, 0xF1, 0x50, 0x80, 0x01, 0x7F, 0xFC, 1, 2, 3, 4];
//! packed_audio.extend_from_slice(&packed_audio.clone());
//! let demuxer = DemuxerKind::probe(&packed_audio).unwrap();
//! assert_eq!(demuxer.name(), "aac");
//! ```

use async_trait::async_trait;
use bytes::Bytes;

use crate::av::{AudioTrack, MetadataTrack, TextTrack, VideoTrack};
use crate::transmux::{DecryptData, Decrypter};
use crate::Result;

pub mod aac;
mod base_audio;
pub mod chunk_cache;
pub mod id3;
pub mod mp3;
pub mod mp4;
pub mod ts;

pub use aac::AACDemuxer;
pub use chunk_cache::ChunkCache;
pub use mp3::MP3Demuxer;
pub use mp4::MP4Demuxer;
pub use ts::TSDemuxer;

/// Samples produced by one demux call, with the codec metadata known so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemuxerResult {
    pub audio: AudioTrack,
    pub video: VideoTrack,
    pub id3: MetadataTrack,
    pub text: TextTrack,
}

impl DemuxerResult {
    pub fn is_empty(&self) -> bool {
        self.audio.samples.is_empty()
            && self.video.samples.is_empty()
            && self.video.fmp4_data.is_none()
            && self.id3.samples.is_empty()
            && self.text.samples.is_empty()
    }
}

#[async_trait]
pub trait Demuxer: Send {
    /// Whether `data` looks like this demuxer's container.
    fn probe(data: &[u8]) -> bool
    where
        Self: Sized;

    fn demux(&mut self, data: Bytes, time_offset: f64, contiguous: bool) -> Result<DemuxerResult>;

    /// Demuxes a SAMPLE-AES protected chunk, decrypting samples in place.
    async fn demux_sample_aes(
        &mut self,
        data: Bytes,
        decrypt: &DecryptData,
        decrypter: &dyn Decrypter,
        time_offset: f64,
        contiguous: bool,
    ) -> Result<DemuxerResult>;

    /// Parses whatever is still buffered at the end of a fragment.
    fn flush(&mut self, time_offset: f64) -> Result<DemuxerResult>;

    fn reset_init_segment(&mut self, audio_codec: Option<&str>, video_codec: Option<&str>, duration: f64);

    fn reset_timestamp(&mut self, default_init_pts: Option<i64>);

    /// Drops partial data and timestamp state tied to the previous chunk.
    fn reset_contiguity(&mut self);
}

/// The closed set of demuxers, in probe order.
pub enum DemuxerKind {
    Ts(TSDemuxer),
    Mp4(MP4Demuxer),
    Aac(AACDemuxer),
    Mp3(MP3Demuxer),
}

impl DemuxerKind {
    /// Picks the first demuxer whose probe accepts `data`.
    pub fn probe(data: &[u8]) -> Option<Self> {
        if TSDemuxer::probe(data) {
            Some(DemuxerKind::Ts(TSDemuxer::new()))
        } else if MP4Demuxer::probe(data) {
            Some(DemuxerKind::Mp4(MP4Demuxer::new()))
        } else if AACDemuxer::probe(data) {
            Some(DemuxerKind::Aac(AACDemuxer::new()))
        } else if MP3Demuxer::probe(data) {
            Some(DemuxerKind::Mp3(MP3Demuxer::new()))
        } else {
            None
        }
    }

    /// Whether this demuxer's own probe accepts `data`.
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            DemuxerKind::Ts(_) => TSDemuxer::probe(data),
            DemuxerKind::Mp4(_) => MP4Demuxer::probe(data),
            DemuxerKind::Aac(_) => AACDemuxer::probe(data),
            DemuxerKind::Mp3(_) => MP3Demuxer::probe(data),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DemuxerKind::Ts(_) => "ts",
            DemuxerKind::Mp4(_) => "mp4",
            DemuxerKind::Aac(_) => "aac",
            DemuxerKind::Mp3(_) => "mp3",
        }
    }

    /// fMP4 input is handed through instead of remuxed.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, DemuxerKind::Mp4(_))
    }

    fn inner(&mut self) -> &mut dyn Demuxer {
        match self {
            DemuxerKind::Ts(d) => d,
            DemuxerKind::Mp4(d) => d,
            DemuxerKind::Aac(d) => d,
            DemuxerKind::Mp3(d) => d,
        }
    }

    pub fn demux(&mut self, data: Bytes, time_offset: f64, contiguous: bool) -> Result<DemuxerResult> {
        self.inner().demux(data, time_offset, contiguous)
    }

    pub async fn demux_sample_aes(
        &mut self,
        data: Bytes,
        decrypt: &DecryptData,
        decrypter: &dyn Decrypter,
        time_offset: f64,
        contiguous: bool,
    ) -> Result<DemuxerResult> {
        self.inner()
            .demux_sample_aes(data, decrypt, decrypter, time_offset, contiguous)
            .await
    }

    pub fn flush(&mut self, time_offset: f64) -> Result<DemuxerResult> {
        self.inner().flush(time_offset)
    }

    pub fn reset_init_segment(&mut self, audio_codec: Option<&str>, video_codec: Option<&str>, duration: f64) {
        self.inner().reset_init_segment(audio_codec, video_codec, duration)
    }

    pub fn reset_timestamp(&mut self, default_init_pts: Option<i64>) {
        self.inner().reset_timestamp(default_init_pts)
    }

    pub fn reset_contiguity(&mut self) {
        self.inner().reset_contiguity()
    }
}

impl std::fmt::Debug for DemuxerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DemuxerKind({})", self.name())
    }
}
