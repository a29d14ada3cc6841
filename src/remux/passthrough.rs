use bytes::{Bytes, BytesMut};

use super::timestamp::seconds_to_ticks;
use super::{InitSegmentData, InitTrack, RemuxedTrack, Remuxer, RemuxerResult, TrackSet};
use crate::av::{AudioTrack, MetadataTrack, TextTrack, VideoTrack, MPEG_TS_CLOCK};
use crate::buffer::SinkKind;
use crate::format::mp4::boxes::{self, InitData};

const DEFAULT_AUDIO_CODEC: &str = "mp4a.40.5";
const DEFAULT_VIDEO_CODEC: &str = "avc1.42e01e";

/// Forwards fMP4 fragments, only rebasing their `tfdt` onto the output
/// timeline. The whole fragment is appended as one chunk.
#[derive(Default)]
pub struct PassThroughRemuxer {
    init_data: Option<InitData>,
    init_tracks: TrackSet,
    emit_init_segment: bool,
    audio_codec: Option<String>,
    video_codec: Option<String>,
    init_pts: Option<i64>,
    last_end_dts: Option<f64>,
}

impl PassThroughRemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    fn init_tracks(init: &InitData, segment: Bytes, audio_codec: &str, video_codec: &str) -> TrackSet {
        let track = |container, codec: String| InitTrack {
            container,
            codec,
            init_segment: segment.clone(),
            channel_count: None,
            width: None,
            height: None,
        };

        match (init.has_audio(), init.has_video()) {
            (true, true) => TrackSet {
                audio_video: Some(track("video/mp4", format!("{},{}", audio_codec, video_codec))),
                ..Default::default()
            },
            (has_audio, has_video) => TrackSet {
                audio: has_audio.then(|| track("audio/mp4", audio_codec.to_string())),
                video: has_video.then(|| track("video/mp4", video_codec.to_string())),
                audio_video: None,
            },
        }
    }
}

impl Remuxer for PassThroughRemuxer {
    fn remux(
        &mut self,
        _audio: AudioTrack,
        video: VideoTrack,
        _id3: MetadataTrack,
        _text: TextTrack,
        time_offset: f64,
        _contiguous: bool,
        _accurate_time_offset: bool,
    ) -> RemuxerResult {
        let mut result = RemuxerResult::default();
        let last_end_dts = *self.last_end_dts.get_or_insert(time_offset);

        let Some(data) = video.fmp4_data.filter(|d| !d.is_empty()) else {
            return result;
        };

        // without a playlist init segment the data may carry its own moov
        if self.init_data.is_none() {
            let (audio_codec, video_codec) = (self.audio_codec.clone(), self.video_codec.clone());
            self.reset_init_segment(Some(data.clone()), audio_codec.as_deref(), video_codec.as_deref());
        }
        let Some(init) = self.init_data.as_ref() else {
            log::warn!("[passthrough-remuxer] failed to generate init segment");
            return result;
        };

        let mut init_segment = InitSegmentData::default();
        if self.emit_init_segment {
            init_segment.tracks = self.init_tracks.clone();
            self.emit_init_segment = false;
        }

        let init_pts = match self.init_pts {
            Some(pts) => pts,
            None => {
                let start = boxes::start_dts(init, &data).unwrap_or(time_offset);
                let pts = seconds_to_ticks(start - time_offset, MPEG_TS_CLOCK);
                log::info!("[passthrough-remuxer] initPTS {}", pts);
                self.init_pts = Some(pts);
                init_segment.init_pts = Some(pts);
                pts
            }
        };

        let duration = boxes::duration(init, &data);
        let mut payload = BytesMut::from(&data[..]);
        boxes::offset_start_dts(init, &mut payload, init_pts);

        let (has_audio, has_video) = (init.has_audio(), init.has_video());
        let kind = match (has_audio, has_video) {
            (true, true) => SinkKind::AudioVideo,
            (true, false) => SinkKind::Audio,
            _ => SinkKind::Video,
        };

        let start_dts = last_end_dts;
        let end_dts = start_dts + duration;
        if duration > 0.0 {
            self.last_end_dts = Some(end_dts);
        } else {
            log::warn!("[passthrough-remuxer] duration parsed from mp4 should be greater than zero");
            self.reset_next_timestamp();
        }

        let track = RemuxedTrack {
            moof: payload.freeze(),
            mdat: Bytes::new(),
            start_pts: start_dts,
            end_pts: end_dts,
            start_dts,
            end_dts,
            kind,
            has_audio,
            has_video,
            samples: 1,
            dropped: 0,
        };
        match kind {
            SinkKind::Audio => result.audio = Some(track),
            _ => result.video = Some(track),
        }
        if !init_segment.tracks.is_empty() || init_segment.init_pts.is_some() {
            result.init_segment = Some(init_segment);
        }
        result
    }

    fn reset_init_segment(&mut self, init_segment: Option<Bytes>, audio_codec: Option<&str>, video_codec: Option<&str>) {
        self.audio_codec = audio_codec.map(str::to_string);
        self.video_codec = video_codec.map(str::to_string);
        self.init_data = None;
        self.init_tracks = TrackSet::default();

        let Some(segment) = init_segment.filter(|s| !s.is_empty()) else {
            return;
        };
        let init = boxes::parse_init_segment(&segment);
        if init.is_empty() {
            log::debug!("[passthrough-remuxer] no audio or video track in init segment");
            return;
        }

        self.init_tracks = Self::init_tracks(
            &init,
            segment,
            audio_codec.unwrap_or(DEFAULT_AUDIO_CODEC),
            video_codec.unwrap_or(DEFAULT_VIDEO_CODEC),
        );
        self.init_data = Some(init);
        self.emit_init_segment = true;
    }

    fn reset_timestamp(&mut self, default_init_pts: Option<i64>) {
        self.init_pts = default_init_pts;
    }

    fn reset_next_timestamp(&mut self) {
        self.last_end_dts = None;
    }
}
