// Transport stream constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const SYNC_BYTE: u8 = 0x47;

/// Bytes scanned for a sync pattern before giving up.
pub const SYNC_SCAN_WINDOW: usize = 1000;

// PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_SDT: u16 = 0x0011;
pub const PID_NULL: u16 = 0x1fff;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;

// Elementary stream types
pub const STREAM_TYPE_MPEG1_AUDIO: u8 = 0x03;
pub const STREAM_TYPE_MPEG2_AUDIO: u8 = 0x04;
pub const STREAM_TYPE_AAC: u8 = 0x0f;
pub const STREAM_TYPE_METADATA: u8 = 0x15;
pub const STREAM_TYPE_H264: u8 = 0x1b;
pub const STREAM_TYPE_H265: u8 = 0x24;
pub const STREAM_TYPE_SAMPLE_AES_AAC: u8 = 0xcf;
pub const STREAM_TYPE_SAMPLE_AES_H264: u8 = 0xdb;

// PES
pub const PES_START_CODE: u32 = 0x000001;
pub const PES_FIXED_HEADER_SIZE: usize = 9;

/// PTS/DTS pairs further apart than this (60 s) are treated as corrupt.
pub const MAX_PTS_DTS_GAP: i64 = 60 * 90_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TSHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PATEntry {
    pub program_number: u16,
    pub program_map_pid: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PAT {
    pub entries: Vec<PATEntry>,
}

impl PAT {
    /// PID of the first program's PMT; network entries (program 0) are skipped.
    pub fn first_pmt_pid(&self) -> Option<u16> {
        self.entries
            .iter()
            .find(|entry| entry.program_number != 0)
            .map(|entry| entry.program_map_pid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementaryStreamInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PMT {
    pub pcr_pid: u16,
    pub elementary_stream_infos: Vec<ElementaryStreamInfo>,
}

/// Audio payload carried by the selected audio PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStreamCodec {
    Aac,
    Mpeg,
}

/// PIDs selected from a PMT, first stream of each kind wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedPids {
    pub avc: Option<u16>,
    pub audio: Option<(u16, AudioStreamCodec)>,
    pub id3: Option<u16>,
}

impl PMT {
    /// Picks the streams this demuxer understands. Encrypted stream types are
    /// only accepted for SAMPLE-AES input.
    pub fn select_streams(&self, sample_aes: bool) -> SelectedPids {
        let mut pids = SelectedPids::default();
        for info in &self.elementary_stream_infos {
            let pid = info.elementary_pid;
            match info.stream_type {
                STREAM_TYPE_SAMPLE_AES_AAC | STREAM_TYPE_AAC => {
                    if info.stream_type == STREAM_TYPE_SAMPLE_AES_AAC && !sample_aes {
                        log::info!("[tsdemuxer] SAMPLE-AES AAC stream found in unencrypted segment");
                        continue;
                    }
                    if pids.audio.is_none() {
                        pids.audio = Some((pid, AudioStreamCodec::Aac));
                    }
                }
                STREAM_TYPE_SAMPLE_AES_H264 | STREAM_TYPE_H264 => {
                    if info.stream_type == STREAM_TYPE_SAMPLE_AES_H264 && !sample_aes {
                        log::info!("[tsdemuxer] SAMPLE-AES AVC stream found in unencrypted segment");
                        continue;
                    }
                    if pids.avc.is_none() {
                        pids.avc = Some(pid);
                    }
                }
                STREAM_TYPE_MPEG1_AUDIO | STREAM_TYPE_MPEG2_AUDIO => {
                    if pids.audio.is_none() {
                        pids.audio = Some((pid, AudioStreamCodec::Mpeg));
                    }
                }
                STREAM_TYPE_METADATA => {
                    if pids.id3.is_none() {
                        pids.id3 = Some(pid);
                    }
                }
                STREAM_TYPE_H265 => log::warn!("[tsdemuxer] HEVC stream on PID {} is not supported", pid),
                other => log::debug!("[tsdemuxer] ignoring stream type {:#04x} on PID {}", other, pid),
            }
        }
        pids
    }
}

/// Reads a 33-bit PTS/DTS field starting at `data[0]`.
pub fn read_timestamp(data: &[u8]) -> i64 {
    ((data[0] as i64 & 0x0E) << 29)
        | ((data[1] as i64) << 22)
        | ((data[2] as i64 & 0xFE) << 14)
        | ((data[3] as i64) << 7)
        | ((data[4] as i64 & 0xFE) >> 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pmt(streams: &[(u8, u16)]) -> PMT {
        PMT {
            pcr_pid: 0x100,
            elementary_stream_infos: streams
                .iter()
                .map(|&(stream_type, elementary_pid)| ElementaryStreamInfo {
                    stream_type,
                    elementary_pid,
                })
                .collect(),
        }
    }

    #[test]
    fn test_select_streams_first_wins() {
        let table = pmt(&[
            (STREAM_TYPE_H264, 0x100),
            (STREAM_TYPE_AAC, 0x101),
            (STREAM_TYPE_MPEG1_AUDIO, 0x102),
            (STREAM_TYPE_METADATA, 0x103),
            (STREAM_TYPE_H264, 0x104),
        ]);
        let pids = table.select_streams(false);
        assert_eq!(pids.avc, Some(0x100));
        assert_eq!(pids.audio, Some((0x101, AudioStreamCodec::Aac)));
        assert_eq!(pids.id3, Some(0x103));
    }

    #[test]
    fn test_encrypted_types_need_sample_aes() {
        let table = pmt(&[(STREAM_TYPE_SAMPLE_AES_H264, 0x100), (STREAM_TYPE_SAMPLE_AES_AAC, 0x101)]);
        assert_eq!(table.select_streams(false), SelectedPids::default());

        let pids = table.select_streams(true);
        assert_eq!(pids.avc, Some(0x100));
        assert_eq!(pids.audio, Some((0x101, AudioStreamCodec::Aac)));
    }

    #[test]
    fn test_read_timestamp() {
        // 0x1_2345_6789 with marker bits
        let pts = 0x1_2345_6789i64;
        let bytes = [
            0x21 | ((pts >> 29) & 0x0E) as u8,
            (pts >> 22) as u8,
            (((pts >> 14) & 0xFE) | 1) as u8,
            (pts >> 7) as u8,
            (((pts << 1) & 0xFE) | 1) as u8,
        ];
        assert_eq!(read_timestamp(&bytes), pts);
    }
}
