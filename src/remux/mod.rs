//! # Remuxers
//!
//! Turn demuxed samples into fragmented MP4 the sinks can append.
//!
//! - [`MP4Remuxer`] builds `moof`/`mdat` pairs from elementary samples,
//!   owning the timestamp baselines (`init_pts`, `next_avc_dts`, ...)
//! - [`PassThroughRemuxer`] forwards fMP4 input, only rebasing `tfdt`
//!
//! [`RemuxerKind`] is the closed set the transmuxer picks from: the fMP4
//! demuxer pairs with passthrough, everything else with the MP4 remuxer.

use bytes::Bytes;

use crate::av::{AudioTrack, MetadataTrack, TextTrack, VideoTrack};
use crate::buffer::SinkKind;

pub mod generator;
pub mod mp4_remuxer;
pub mod passthrough;
pub mod timestamp;

pub use mp4_remuxer::MP4Remuxer;
pub use passthrough::PassThroughRemuxer;

/// One appendable chunk for one sink. Times are seconds on the output timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RemuxedTrack {
    /// The `moof`, or the whole boxed payload on the passthrough path.
    pub moof: Bytes,
    pub mdat: Bytes,
    pub start_pts: f64,
    pub end_pts: f64,
    pub start_dts: f64,
    pub end_dts: f64,
    pub kind: SinkKind,
    pub has_audio: bool,
    pub has_video: bool,
    pub samples: usize,
    pub dropped: u32,
}

impl RemuxedTrack {
    /// Bytes to append, in order.
    pub fn segments(&self) -> impl Iterator<Item = &Bytes> {
        [&self.moof, &self.mdat].into_iter().filter(|b| !b.is_empty())
    }
}

/// An ID3 tag placed on the output timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedMetadata {
    pub pts: f64,
    pub dts: f64,
    pub data: Bytes,
}

/// Caption bytes placed on the output timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedUserdata {
    pub pts: f64,
    pub payload: Bytes,
}

/// Sink setup for one track: container, codec and init segment.
#[derive(Debug, Clone, PartialEq)]
pub struct InitTrack {
    pub container: &'static str,
    pub codec: String,
    pub init_segment: Bytes,
    pub channel_count: Option<u8>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl InitTrack {
    pub fn mime_type(&self) -> String {
        format!("{};codecs={}", self.container, self.codec)
    }
}

/// Tracks announced by an init segment. A muxed fMP4 source uses
/// `audio_video` only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackSet {
    pub audio: Option<InitTrack>,
    pub video: Option<InitTrack>,
    pub audio_video: Option<InitTrack>,
}

impl TrackSet {
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none() && self.audio_video.is_none()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SinkKind, &InitTrack)> {
        [
            (SinkKind::Audio, self.audio.as_ref()),
            (SinkKind::Video, self.video.as_ref()),
            (SinkKind::AudioVideo, self.audio_video.as_ref()),
        ]
        .into_iter()
        .filter_map(|(kind, track)| track.map(|t| (kind, t)))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitSegmentData {
    pub tracks: TrackSet,
    /// Set when this call fixed the 90 kHz timestamp baseline.
    pub init_pts: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemuxerResult {
    pub audio: Option<RemuxedTrack>,
    pub video: Option<RemuxedTrack>,
    pub text: Option<Vec<TimedUserdata>>,
    pub id3: Option<Vec<TimedMetadata>>,
    pub init_segment: Option<InitSegmentData>,
}

impl RemuxerResult {
    pub fn is_empty(&self) -> bool {
        self.audio.is_none()
            && self.video.is_none()
            && self.text.is_none()
            && self.id3.is_none()
            && self.init_segment.is_none()
    }
}

pub trait Remuxer: Send {
    #[allow(clippy::too_many_arguments)]
    fn remux(
        &mut self,
        audio: AudioTrack,
        video: VideoTrack,
        id3: MetadataTrack,
        text: TextTrack,
        time_offset: f64,
        contiguous: bool,
        accurate_time_offset: bool,
    ) -> RemuxerResult;

    /// Remuxes the last samples of a fragment.
    fn flush(
        &mut self,
        audio: AudioTrack,
        video: VideoTrack,
        id3: MetadataTrack,
        text: TextTrack,
        time_offset: f64,
        accurate_time_offset: bool,
    ) -> RemuxerResult {
        self.remux(audio, video, id3, text, time_offset, true, accurate_time_offset)
    }

    fn reset_init_segment(&mut self, init_segment: Option<Bytes>, audio_codec: Option<&str>, video_codec: Option<&str>);

    /// Drops the timestamp baseline, optionally seeding it with a known value.
    fn reset_timestamp(&mut self, default_init_pts: Option<i64>);

    /// Forgets where the next samples are expected to start.
    fn reset_next_timestamp(&mut self);
}

/// The closed set of remuxers.
pub enum RemuxerKind {
    Mp4(MP4Remuxer),
    Passthrough(PassThroughRemuxer),
}

impl RemuxerKind {
    fn inner(&mut self) -> &mut dyn Remuxer {
        match self {
            RemuxerKind::Mp4(r) => r,
            RemuxerKind::Passthrough(r) => r,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn remux(
        &mut self,
        audio: AudioTrack,
        video: VideoTrack,
        id3: MetadataTrack,
        text: TextTrack,
        time_offset: f64,
        contiguous: bool,
        accurate_time_offset: bool,
    ) -> RemuxerResult {
        self.inner()
            .remux(audio, video, id3, text, time_offset, contiguous, accurate_time_offset)
    }

    pub fn flush(
        &mut self,
        audio: AudioTrack,
        video: VideoTrack,
        id3: MetadataTrack,
        text: TextTrack,
        time_offset: f64,
        accurate_time_offset: bool,
    ) -> RemuxerResult {
        self.inner().flush(audio, video, id3, text, time_offset, accurate_time_offset)
    }

    pub fn reset_init_segment(&mut self, init_segment: Option<Bytes>, audio_codec: Option<&str>, video_codec: Option<&str>) {
        self.inner().reset_init_segment(init_segment, audio_codec, video_codec)
    }

    pub fn reset_timestamp(&mut self, default_init_pts: Option<i64>) {
        self.inner().reset_timestamp(default_init_pts)
    }

    pub fn reset_next_timestamp(&mut self) {
        self.inner().reset_next_timestamp()
    }
}

impl std::fmt::Debug for RemuxerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemuxerKind::Mp4(_) => write!(f, "RemuxerKind(mp4)"),
            RemuxerKind::Passthrough(_) => write!(f, "RemuxerKind(passthrough)"),
        }
    }
}
