//! Packed ADTS audio (`.aac` segments).

use bytes::Bytes;

use super::base_audio::{impl_audio_demuxer, AudioFraming, BaseAudioDemuxer, FrameStatus};
use crate::av::{AudioSample, AudioTrack};
use crate::codec::aac::{parser, AACConfig};

/// ADTS framing.
pub struct Adts;

/// Demuxer for packed AAC segments.
pub type AACDemuxer = BaseAudioDemuxer<Adts>;

impl_audio_demuxer!(Adts);

impl AudioFraming for Adts {
    const NAME: &'static str = "aac-demuxer";

    fn is_header(data: &[u8], offset: usize) -> bool {
        parser::is_header(data, offset)
    }

    fn can_parse(data: &[u8], offset: usize) -> bool {
        parser::can_parse(data, offset)
    }

    fn probe_at(data: &[u8], offset: usize) -> bool {
        parser::probe(data, offset)
    }

    fn init_track(track: &mut AudioTrack, data: &[u8], offset: usize) {
        configure_track(track, data, offset);
    }

    fn parse_frame(track: &AudioTrack, data: &Bytes, offset: usize, base_pts: i64, index: u32) -> FrameStatus {
        match read_frame(track, data, offset, base_pts, index) {
            Some(Ok((length, sample))) => FrameStatus::Complete { length, sample },
            Some(Err(_missing)) => FrameStatus::Incomplete,
            None => FrameStatus::Invalid,
        }
    }

    fn new_track(audio_codec: Option<&str>, duration: f64) -> AudioTrack {
        let mut track = AudioTrack::new(duration);
        track.is_aac = true;
        track.manifest_codec = audio_codec.map(str::to_owned);
        track
    }
}

/// Sets samplerate, channel count, AudioSpecificConfig and codec string from
/// the ADTS header at `offset`. Returns `false` when no header can be read.
pub(crate) fn configure_track(track: &mut AudioTrack, data: &[u8], offset: usize) -> bool {
    let Ok(header) = parser::parse_adts_header(&data[offset..]) else {
        return false;
    };
    let config = AACConfig::from_adts(&header, track.manifest_codec.as_deref());
    let Some(samplerate) = config.sample_rate() else {
        return false;
    };
    if track.samplerate != Some(samplerate) || track.config.is_none() {
        log::info!(
            "[aac] parsed codec {}, rate {}, channels {}",
            config.codec_string(),
            samplerate,
            header.channel_configuration
        );
    }
    track.samplerate = Some(samplerate);
    track.channel_count = header.channel_configuration;
    track.config = Some(config.audio_specific_config());
    track.codec = Some(config.codec_string());
    track.is_aac = true;
    true
}

/// Reads the frame at `offset`.
///
/// `Some(Ok((length, sample)))` for a complete frame, `Some(Err(missing))`
/// when `missing` bytes of the frame are beyond `data`, `None` for an
/// unreadable header.
pub(crate) fn read_frame(
    track: &AudioTrack,
    data: &Bytes,
    offset: usize,
    base_pts: i64,
    index: u32,
) -> Option<Result<(usize, AudioSample), usize>> {
    let header = parser::parse_adts_header(&data[offset..]).ok()?;
    let samplerate = track.samplerate.or_else(|| header.sample_rate())?;
    let header_length = header.header_length();
    let length = header.frame_length as usize;
    if length <= header_length {
        return None;
    }

    let end = offset + length;
    if end > data.len() {
        return Some(Err(end - data.len()));
    }

    let pts = base_pts + (index as f64 * parser::frame_duration(samplerate)).round() as i64;
    Some(Ok((
        length,
        AudioSample::new(pts, data.slice(offset + header_length..end)),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{id3, Demuxer};
    use pretty_assertions::assert_eq;

    /// ADTS frame: AAC-LC, 48 kHz, stereo, `payload` bytes of payload.
    fn adts_frame(payload: &[u8]) -> Vec<u8> {
        let length = payload.len() + 7;
        let mut frame = vec![
            0xFF,
            0xF1,
            0x4C, // LC, 48 kHz
            0x80 | ((length >> 11) & 0x03) as u8,
            ((length >> 3) & 0xFF) as u8,
            (((length & 0x07) << 5) as u8) | 0x1F,
            0xFC,
        ];
        frame.extend_from_slice(payload);
        frame
    }

    fn segment(timestamp: i64, frames: usize) -> Vec<u8> {
        let mut data = id3::timestamp_tag(timestamp);
        for i in 0..frames {
            data.extend(adts_frame(&[i as u8; 20]));
        }
        data
    }

    #[test]
    fn test_probe() {
        let data = segment(0, 2);
        assert!(AACDemuxer::probe(&data));
        assert!(!AACDemuxer::probe(&[0u8; 64]));
    }

    #[test]
    fn test_timestamps_from_id3() {
        let mut demuxer = AACDemuxer::new();
        demuxer.reset_init_segment(None, None, 10.0);
        let result = demuxer.demux(Bytes::from(segment(900_000, 3)), 5.0, false).unwrap();

        let track = &result.audio;
        assert_eq!(track.samplerate, Some(48_000));
        assert_eq!(track.channel_count, 2);
        assert_eq!(track.codec.as_deref(), Some("mp4a.40.2"));
        let pts: Vec<i64> = track.samples.iter().map(|s| s.pts).collect();
        assert_eq!(pts, vec![900_000, 901_920, 903_840]);
        assert_eq!(track.samples[1].unit.len(), 20);

        assert_eq!(result.id3.samples.len(), 1);
        assert_eq!(result.id3.samples[0].pts, 900_000);
    }

    #[test]
    fn test_time_offset_without_id3() {
        let mut demuxer = AACDemuxer::new();
        demuxer.reset_init_segment(None, None, 10.0);
        let data: Vec<u8> = (0..2).flat_map(|_| adts_frame(&[0; 10])).collect();
        let result = demuxer.demux(Bytes::from(data), 2.0, false).unwrap();
        assert_eq!(result.audio.samples[0].pts, 180_000);
    }

    #[test]
    fn test_chunked_equals_whole() {
        let data = segment(90_000, 6);
        let mut whole = AACDemuxer::new();
        whole.reset_init_segment(None, None, 10.0);
        let expected = whole.demux(Bytes::from(data.clone()), 0.0, false).unwrap();

        let mut chunked = AACDemuxer::new();
        chunked.reset_init_segment(None, None, 10.0);
        let mut samples = Vec::new();
        let mut tags = 0;
        for chunk in data.chunks(37) {
            let result = chunked.demux(Bytes::copy_from_slice(chunk), 0.0, true).unwrap();
            samples.extend(result.audio.samples);
            tags += result.id3.samples.len();
        }
        samples.extend(chunked.flush(0.0).unwrap().audio.samples);

        assert_eq!(samples, expected.audio.samples);
        assert_eq!(tags, 1);
    }

    #[test]
    fn test_flush_drops_partial_frame() {
        let mut demuxer = AACDemuxer::new();
        demuxer.reset_init_segment(None, None, 10.0);
        let mut data = adts_frame(&[1; 20]);
        data.extend_from_slice(&adts_frame(&[2; 20])[..12]);

        let result = demuxer.demux(Bytes::from(data), 0.0, false).unwrap();
        assert_eq!(result.audio.samples.len(), 1);
        let result = demuxer.flush(0.0).unwrap();
        assert!(result.audio.samples.is_empty());
    }

    #[tokio::test]
    async fn test_sample_aes_unsupported() {
        struct NoopDecrypter;
        #[async_trait::async_trait]
        impl crate::transmux::Decrypter for NoopDecrypter {
            async fn decrypt(&self, data: Bytes, _key: &[u8; 16], _iv: &[u8; 16]) -> crate::Result<Bytes> {
                Ok(data)
            }
        }

        let mut demuxer = AACDemuxer::new();
        let decrypt = crate::transmux::DecryptData::default();
        let result = demuxer
            .demux_sample_aes(Bytes::new(), &decrypt, &NoopDecrypter, 0.0, false)
            .await;
        assert!(matches!(result, Err(crate::HlsError::Unsupported(_))));
    }
}
