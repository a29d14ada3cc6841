use std::collections::BTreeMap;

use url::Url;

use super::stats::LoadStats;
use crate::buffer::SinkKind;
use crate::transmux::{DecryptData, FragmentKey};

/// Which playlist a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum PlaylistType {
    #[default]
    Main,
    Audio,
    Subtitle,
}

/// Timing of one elementary stream of a fragment, seconds on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementaryStreamInfo {
    pub start_pts: f64,
    pub end_pts: f64,
    pub start_dts: f64,
    pub end_dts: f64,
    pub partial: bool,
}

/// A media segment of a level, with what was learned while loading and
/// parsing it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fragment {
    pub kind: PlaylistType,
    pub level: usize,
    pub sn: u64,
    pub cc: u32,
    /// Playlist start, replaced by the parsed start PTS once known.
    pub start: f64,
    pub duration: f64,
    pub start_pts: Option<f64>,
    pub end_pts: Option<f64>,
    pub start_dts: Option<f64>,
    pub end_dts: Option<f64>,
    pub max_start_pts: Option<f64>,
    /// Largest PTS difference seen between the fragment's streams.
    pub delta_pts: Option<f64>,
    /// Furthest buffered end seen while appending.
    pub appended_pts: Option<f64>,
    pub url: Option<Url>,
    /// `(offset, length)` of an `EXT-X-BYTERANGE`.
    pub byte_range: Option<(u64, u64)>,
    pub decrypt_data: Option<DecryptData>,
    /// Loaded at the lowest level only to measure bandwidth.
    pub bitrate_test: bool,
    pub stats: LoadStats,
    pub elementary_streams: BTreeMap<SinkKind, ElementaryStreamInfo>,
}

impl Fragment {
    pub fn new(kind: PlaylistType, level: usize, sn: u64, cc: u32, start: f64, duration: f64) -> Self {
        Self {
            kind,
            level,
            sn,
            cc,
            start,
            duration,
            ..Default::default()
        }
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn key(&self) -> FragmentKey {
        FragmentKey {
            level: self.level,
            sn: self.sn,
            cc: self.cc,
        }
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Merges the timing of one remuxed stream into the fragment.
    pub fn set_elementary_stream_info(
        &mut self,
        kind: SinkKind,
        start_pts: f64,
        end_pts: f64,
        start_dts: f64,
        end_dts: f64,
        partial: bool,
    ) {
        let info = self
            .elementary_streams
            .entry(kind)
            .or_insert(ElementaryStreamInfo {
                start_pts,
                end_pts,
                start_dts,
                end_dts,
                partial,
            });
        info.start_pts = info.start_pts.min(start_pts);
        info.end_pts = info.end_pts.max(end_pts);
        info.start_dts = info.start_dts.min(start_dts);
        info.end_dts = info.end_dts.max(end_dts);
        info.partial = partial;
    }

    pub fn has_stream(&self, kind: SinkKind) -> bool {
        self.elementary_streams.contains_key(&kind)
    }
}
