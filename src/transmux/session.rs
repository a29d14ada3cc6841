use std::collections::BTreeMap;
use std::time::Instant;

use bytes::Bytes;

use crate::buffer::SinkKind;

/// Identity of a fragment as far as transmuxing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentKey {
    pub level: usize,
    pub sn: u64,
    /// Discontinuity counter.
    pub cc: u32,
}

/// How a chunk relates to what was transmuxed before it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransmuxState {
    pub discontinuity: bool,
    pub track_switch: bool,
    pub contiguous: bool,
    pub accurate_time_offset: bool,
    pub time_offset: f64,
}

impl TransmuxState {
    /// State of the first chunk of `key`, given the fragment transmuxed last.
    pub fn for_fragment(last: Option<FragmentKey>, key: FragmentKey, time_offset: f64, accurate_time_offset: bool) -> Self {
        let discontinuity = last.map_or(true, |l| l.cc != key.cc);
        let track_switch = last.map_or(true, |l| l.level != key.level);
        let contiguous = !track_switch && last.is_some_and(|l| key.sn == l.sn + 1);
        Self {
            discontinuity,
            track_switch,
            contiguous,
            accurate_time_offset,
            time_offset,
        }
    }

    /// State of a later chunk of the same fragment.
    pub fn continuation(time_offset: f64, accurate_time_offset: bool) -> Self {
        Self {
            discontinuity: false,
            track_switch: false,
            contiguous: true,
            accurate_time_offset,
            time_offset,
        }
    }
}

/// Per-fragment setup of the muxers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransmuxConfig {
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    /// `EXT-X-MAP` init segment of fMP4 playlists.
    pub init_segment: Option<Bytes>,
    /// Playlist duration of the fragment, seconds.
    pub duration: f64,
    /// 90 kHz baseline to seed the remuxer with after a discontinuity.
    pub default_init_pts: Option<i64>,
}

/// Wall-clock marks of one processing step. Diagnostics only.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChunkTiming {
    pub start: Option<Instant>,
    pub execute_start: Option<Instant>,
    pub execute_end: Option<Instant>,
    pub end: Option<Instant>,
}

/// Travels with a chunk through transmuxing and buffering.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMetadata {
    pub level: usize,
    pub sn: u64,
    pub cc: u32,
    /// Index of the chunk within its fragment.
    pub id: usize,
    pub size: usize,
    pub transmuxing: ChunkTiming,
    pub buffering: BTreeMap<SinkKind, ChunkTiming>,
}

impl ChunkMetadata {
    pub fn new(key: FragmentKey, id: usize, size: usize) -> Self {
        Self {
            level: key.level,
            sn: key.sn,
            cc: key.cc,
            id,
            size,
            transmuxing: ChunkTiming::default(),
            buffering: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> FragmentKey {
        FragmentKey {
            level: self.level,
            sn: self.sn,
            cc: self.cc,
        }
    }
}
