use bytes::Bytes;

/// ADTS `profile` field (audio object type minus one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileType {
    Main = 0,
    LC = 1,
    SSR = 2,
    LTP = 3,
}

impl From<u8> for ProfileType {
    fn from(value: u8) -> Self {
        match value & 0x03 {
            0 => ProfileType::Main,
            1 => ProfileType::LC,
            2 => ProfileType::SSR,
            _ => ProfileType::LTP,
        }
    }
}

impl ProfileType {
    /// MPEG-4 audio object type signalled by this profile.
    pub fn object_type(self) -> u8 {
        self as u8 + 1
    }
}

/// Sampling frequencies indexed by `sampling_frequency_index`.
pub const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Audio object type used for the HE-AAC (SBR) signalling.
const HE_AAC_OBJECT_TYPE: u8 = 5;

/// Decoder setup shared by every frame of an AAC stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AACConfig {
    pub profile: ProfileType,
    pub sample_rate_index: u8,
    pub channel_configuration: u8,
    /// Sampling index of the SBR extension when HE-AAC is signalled explicitly.
    pub extension_sample_rate_index: Option<u8>,
}

impl Default for AACConfig {
    fn default() -> Self {
        Self {
            profile: ProfileType::LC,
            sample_rate_index: 4,
            channel_configuration: 2,
            extension_sample_rate_index: None,
        }
    }
}

impl AACConfig {
    /// Builds the configuration for an ADTS stream.
    ///
    /// A playlist that announces HE-AAC (`mp4a.40.5`, or `mp4a.40.29` at 24 kHz
    /// and below) gets explicit SBR signalling with the extension running at
    /// twice the core rate.
    pub fn from_adts(header: &ADTSHeader, manifest_codec: Option<&str>) -> Self {
        let index = header.sample_rate_index;
        let he_aac = manifest_codec.is_some_and(|codec| {
            codec.contains("mp4a.40.5") || (codec.contains("mp4a.40.29") && index >= 6)
        });
        Self {
            profile: header.profile,
            sample_rate_index: index,
            channel_configuration: header.channel_configuration,
            extension_sample_rate_index: he_aac.then(|| index.saturating_sub(3)),
        }
    }

    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES.get(self.sample_rate_index as usize).copied()
    }

    /// `mp4a.40.<object type>` of the core stream.
    pub fn codec_string(&self) -> String {
        format!("mp4a.40.{}", self.profile.object_type())
    }

    /// AudioSpecificConfig (ISO/IEC 14496-3 1.6.2.1) for the `esds` box.
    pub fn audio_specific_config(&self) -> Bytes {
        let index = self.sample_rate_index & 0x0F;
        let object_type = if self.extension_sample_rate_index.is_some() {
            HE_AAC_OBJECT_TYPE
        } else {
            self.profile.object_type()
        };

        let mut config = vec![
            (object_type << 3) | ((index & 0x0E) >> 1),
            ((index & 0x01) << 7) | ((self.channel_configuration & 0x0F) << 3),
        ];
        if let Some(ext) = self.extension_sample_rate_index {
            config[1] |= (ext & 0x0E) >> 1;
            // extension sampling index low bit, then the core object type (LC)
            config.push(((ext & 0x01) << 7) | (2 << 2));
            config.push(0);
        }
        Bytes::from(config)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ADTSHeader {
    pub id: u8,
    pub layer: u8,
    pub protection_absent: bool,
    pub profile: ProfileType,
    pub sample_rate_index: u8,
    pub channel_configuration: u8,
    /// Whole frame including the header.
    pub frame_length: u16,
    pub buffer_fullness: u16,
    pub number_of_raw_blocks: u8,
}

impl ADTSHeader {
    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES.get(self.sample_rate_index as usize).copied()
    }

    /// 7 bytes, or 9 when a CRC follows the fixed header.
    pub fn header_length(&self) -> usize {
        if self.protection_absent {
            7
        } else {
            9
        }
    }

    pub fn payload_length(&self) -> usize {
        (self.frame_length as usize).saturating_sub(self.header_length())
    }
}
