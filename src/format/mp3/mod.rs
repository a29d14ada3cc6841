//! Packed MPEG audio (`.mp3` segments).

use bytes::Bytes;

use super::base_audio::{impl_audio_demuxer, AudioFraming, BaseAudioDemuxer, FrameStatus};
use crate::av::{AudioSample, AudioTrack};
use crate::codec::mpeg_audio;

/// MPEG-1/2/2.5 audio framing.
pub struct MpegAudio;

/// Demuxer for packed MPEG audio segments.
pub type MP3Demuxer = BaseAudioDemuxer<MpegAudio>;

impl_audio_demuxer!(MpegAudio);

impl AudioFraming for MpegAudio {
    const NAME: &'static str = "mp3-demuxer";

    fn is_header(data: &[u8], offset: usize) -> bool {
        mpeg_audio::is_header(data, offset)
    }

    fn can_parse(data: &[u8], offset: usize) -> bool {
        mpeg_audio::can_parse(data, offset)
    }

    fn probe_at(data: &[u8], offset: usize) -> bool {
        mpeg_audio::probe(data, offset)
    }

    fn init_track(track: &mut AudioTrack, data: &[u8], offset: usize) {
        if let Ok(header) = mpeg_audio::parse_header(data, offset) {
            track.samplerate = Some(header.sample_rate);
            track.channel_count = header.channel_count;
            track.codec = Some("mp3".to_owned());
        }
    }

    fn parse_frame(_track: &AudioTrack, data: &Bytes, offset: usize, base_pts: i64, index: u32) -> FrameStatus {
        match read_frame(data, offset, base_pts, index) {
            Some(Ok((length, sample))) => FrameStatus::Complete { length, sample },
            Some(Err(_)) => FrameStatus::Incomplete,
            None => FrameStatus::Invalid,
        }
    }

    fn new_track(audio_codec: Option<&str>, duration: f64) -> AudioTrack {
        let mut track = AudioTrack::new(duration);
        track.manifest_codec = audio_codec.map(str::to_owned);
        track
    }
}

/// Reads the frame at `offset`; the sample unit keeps the 4 byte header.
///
/// `Some(Err(missing))` when the frame ends `missing` bytes past `data`.
pub(crate) fn read_frame(
    data: &Bytes,
    offset: usize,
    base_pts: i64,
    index: u32,
) -> Option<Result<(usize, AudioSample), usize>> {
    let header = mpeg_audio::parse_header(data, offset).ok()?;
    let length = header.frame_length;
    if length < mpeg_audio::MPEG_AUDIO_HEADER_SIZE {
        return None;
    }
    let end = offset + length;
    if end > data.len() {
        return Some(Err(end - data.len()));
    }
    let pts = base_pts + (index as f64 * header.frame_duration()).round() as i64;
    Some(Ok((length, AudioSample::new(pts, data.slice(offset..end)))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{id3, Demuxer};
    use pretty_assertions::assert_eq;

    /// MPEG-1 layer III, 128 kbit/s, 44.1 kHz, stereo, no padding: 417 bytes.
    fn mp3_frame(fill: u8) -> Vec<u8> {
        let mut frame = vec![fill; 417];
        frame[..4].copy_from_slice(&[0xFF, 0xFB, 0x90, 0x44]);
        frame
    }

    #[test]
    fn test_probe() {
        let data: Vec<u8> = (0..3).flat_map(|_| mp3_frame(0)).collect();
        assert!(MP3Demuxer::probe(&data));

        let mut tagged = id3::timestamp_tag(0);
        tagged.extend_from_slice(&data);
        assert!(MP3Demuxer::probe(&tagged));
        assert!(!MP3Demuxer::probe(&[0x47; 376]));
    }

    #[test]
    fn test_frames_keep_header() {
        let mut data = id3::timestamp_tag(90_000);
        for i in 0..3 {
            data.extend(mp3_frame(i));
        }
        let mut demuxer = MP3Demuxer::new();
        demuxer.reset_init_segment(Some("mp3"), None, 6.0);
        let result = demuxer.demux(Bytes::from(data), 0.0, false).unwrap();

        let track = &result.audio;
        assert_eq!(track.codec.as_deref(), Some("mp3"));
        assert_eq!(track.samplerate, Some(44_100));
        assert_eq!(track.samples.len(), 3);
        assert_eq!(track.samples[0].unit.len(), 417);
        assert_eq!(&track.samples[2].unit[..4], &[0xFF, 0xFB, 0x90, 0x44]);

        // 1152 samples at 44.1 kHz = 2351.02 ticks
        let pts: Vec<i64> = track.samples.iter().map(|s| s.pts).collect();
        assert_eq!(pts, vec![90_000, 92_351, 94_702]);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let data: Vec<u8> = (0..2).flat_map(|i| mp3_frame(i)).collect();
        let mut demuxer = MP3Demuxer::new();
        demuxer.reset_init_segment(None, None, 6.0);

        let first = demuxer.demux(Bytes::copy_from_slice(&data[..600]), 1.0, false).unwrap();
        assert_eq!(first.audio.samples.len(), 1);
        assert_eq!(first.audio.samples[0].pts, 90_000);

        let second = demuxer.demux(Bytes::copy_from_slice(&data[600..]), 1.0, true).unwrap();
        assert_eq!(second.audio.samples.len(), 1);
        assert_eq!(second.audio.samples[0].pts, 92_351);
        assert!(demuxer.flush(1.0).unwrap().audio.samples.is_empty());
    }

    #[test]
    fn test_garbage_between_frames_is_skipped() {
        let mut data = mp3_frame(1);
        data.extend_from_slice(&[0x00, 0x11, 0x22]);
        data.extend(mp3_frame(2));
        let mut demuxer = MP3Demuxer::new();
        let result = demuxer.demux(Bytes::from(data), 0.0, false).unwrap();
        assert_eq!(result.audio.samples.len(), 2);
    }
}
