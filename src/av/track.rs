use bytes::Bytes;

/// Clock of MPEG-TS timestamps and of every track this crate demuxes.
pub const MPEG_TS_CLOCK: u32 = 90_000;

/// One H.264 access unit.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoSample {
    pub pts: i64,
    pub dts: i64,
    pub key: bool,
    /// Set once a slice was seen; samples made only of parameter sets are not frames.
    pub frame: bool,
    /// NAL units without start codes.
    pub units: Vec<Bytes>,
}

impl VideoSample {
    pub fn new(pts: i64, dts: i64) -> Self {
        Self {
            pts,
            dts,
            ..Default::default()
        }
    }

    pub fn with_key_flag(mut self, key: bool) -> Self {
        self.key = key;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<Bytes>) -> Self {
        self.units.push(unit.into());
        self.frame = true;
        self
    }

    /// Payload size without length prefixes.
    pub fn len(&self) -> usize {
        self.units.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// One AAC access unit or MPEG audio frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    pub pts: i64,
    pub dts: i64,
    pub unit: Bytes,
}

impl AudioSample {
    pub fn new(pts: i64, unit: impl Into<Bytes>) -> Self {
        Self {
            pts,
            dts: pts,
            unit: unit.into(),
        }
    }
}

/// A complete ID3 tag with the time it applies to.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSample {
    pub pts: i64,
    pub dts: i64,
    pub data: Bytes,
}

/// CEA-608/708 caption bytes carried in H.264 SEI user data.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSample {
    pub pts: i64,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoTrack {
    pub pid: Option<u16>,
    pub input_timescale: u32,
    pub sequence_number: u32,
    pub dropped: u32,
    pub samples: Vec<VideoSample>,
    pub sps: Option<Bytes>,
    pub pps: Option<Bytes>,
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: (u32, u32),
    /// `avc1.PPCCLL`, from the SPS.
    pub codec: Option<String>,
    pub manifest_codec: Option<String>,
    /// Fragment duration in seconds as announced by the playlist.
    pub duration: f64,
    /// fMP4 boxes handed through unchanged by the passthrough demuxer.
    pub fmp4_data: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioTrack {
    pub pid: Option<u16>,
    pub input_timescale: u32,
    pub sequence_number: u32,
    pub dropped: u32,
    pub samples: Vec<AudioSample>,
    pub samplerate: Option<u32>,
    pub channel_count: u8,
    /// AudioSpecificConfig for AAC.
    pub config: Option<Bytes>,
    /// `mp4a.40.x` or `mp3`.
    pub codec: Option<String>,
    pub manifest_codec: Option<String>,
    pub is_aac: bool,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetadataTrack {
    pub pid: Option<u16>,
    pub input_timescale: u32,
    pub sequence_number: u32,
    pub samples: Vec<MetadataSample>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextTrack {
    pub input_timescale: u32,
    pub sequence_number: u32,
    pub samples: Vec<TextSample>,
}

impl VideoTrack {
    pub fn new(duration: f64) -> Self {
        Self {
            input_timescale: MPEG_TS_CLOCK,
            pixel_ratio: (1, 1),
            duration,
            ..Default::default()
        }
    }

    /// A copy of the track carrying only the samples collected since the
    /// last call; codec metadata stays on `self`.
    pub fn take_samples(&mut self) -> Self {
        Self {
            samples: std::mem::take(&mut self.samples),
            fmp4_data: self.fmp4_data.take(),
            ..self.clone_metadata()
        }
    }

    fn clone_metadata(&self) -> Self {
        Self {
            pid: self.pid,
            input_timescale: self.input_timescale,
            sequence_number: self.sequence_number,
            dropped: self.dropped,
            samples: Vec::new(),
            sps: self.sps.clone(),
            pps: self.pps.clone(),
            width: self.width,
            height: self.height,
            pixel_ratio: self.pixel_ratio,
            codec: self.codec.clone(),
            manifest_codec: self.manifest_codec.clone(),
            duration: self.duration,
            fmp4_data: None,
        }
    }

    pub fn has_samples(&self) -> bool {
        !self.samples.is_empty()
    }

    /// Whether the parameter sets needed for an `avcC` box were seen.
    pub fn is_configured(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }
}

impl AudioTrack {
    pub fn new(duration: f64) -> Self {
        Self {
            input_timescale: MPEG_TS_CLOCK,
            duration,
            ..Default::default()
        }
    }

    pub fn take_samples(&mut self) -> Self {
        let samples = std::mem::take(&mut self.samples);
        Self {
            samples,
            ..self.clone()
        }
    }

    pub fn is_configured(&self) -> bool {
        self.samplerate.is_some() && self.codec.is_some()
    }

    /// Samples per frame for the track's codec.
    pub fn frame_samples(&self) -> u32 {
        if self.is_aac {
            1024
        } else {
            1152
        }
    }
}

impl MetadataTrack {
    pub fn new() -> Self {
        Self {
            input_timescale: MPEG_TS_CLOCK,
            ..Default::default()
        }
    }

    pub fn take_samples(&mut self) -> Self {
        Self {
            pid: self.pid,
            input_timescale: self.input_timescale,
            sequence_number: self.sequence_number,
            samples: std::mem::take(&mut self.samples),
        }
    }
}

impl TextTrack {
    pub fn new() -> Self {
        Self {
            input_timescale: MPEG_TS_CLOCK,
            ..Default::default()
        }
    }

    pub fn take_samples(&mut self) -> Self {
        Self {
            input_timescale: self.input_timescale,
            sequence_number: self.sequence_number,
            samples: std::mem::take(&mut self.samples),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_take_samples_keeps_codec_metadata() {
        let mut track = VideoTrack::new(10.0);
        track.codec = Some("avc1.42e01e".into());
        track.sps = Some(Bytes::from_static(&[0x67, 0x42]));
        track.samples.push(VideoSample::new(9000, 9000).with_unit(vec![0x65u8, 0x88]));

        let taken = track.take_samples();
        assert_eq!(taken.samples.len(), 1);
        assert_eq!(taken.codec.as_deref(), Some("avc1.42e01e"));
        assert!(track.samples.is_empty());
        assert_eq!(track.codec.as_deref(), Some("avc1.42e01e"));

        let mut audio = AudioTrack::new(10.0);
        audio.samplerate = Some(48_000);
        audio.samples.push(AudioSample::new(0, vec![0u8; 4]));
        let taken = audio.take_samples();
        assert_eq!(taken.samples.len(), 1);
        assert_eq!(audio.samplerate, Some(48_000));
        assert!(audio.samples.is_empty());
    }

    #[test]
    fn test_sample_len() {
        let sample = VideoSample::new(0, 0)
            .with_unit(vec![0u8; 10])
            .with_unit(vec![0u8; 5])
            .with_key_flag(true);
        assert_eq!(sample.len(), 15);
        assert!(sample.key);
        assert!(sample.frame);
    }
}
