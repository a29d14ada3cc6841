use url::Url;

use super::fragment::Fragment;

/// Bytes and seconds loaded so far from a level.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadedTotals {
    pub bytes: u64,
    pub duration: f64,
}

/// Parsed media playlist of a level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelDetails {
    pub fragments: Vec<Fragment>,
    pub total_duration: f64,
    pub target_duration: f64,
    pub average_target_duration: Option<f64>,
    pub live: bool,
    pub start_sn: u64,
    pub end_sn: u64,
    /// Whether fragment starts come from parsed PTS rather than the playlist.
    pub pts_known: bool,
    /// Whether the last refresh changed the playlist.
    pub updated: bool,
}

impl LevelDetails {
    pub fn new(fragments: Vec<Fragment>, target_duration: f64, live: bool) -> Self {
        let start_sn = fragments.first().map_or(0, |f| f.sn);
        let end_sn = fragments.last().map_or(0, |f| f.sn);
        let total_duration = fragments.iter().map(|f| f.duration).sum();
        Self {
            fragments,
            total_duration,
            target_duration,
            average_target_duration: None,
            live,
            start_sn,
            end_sn,
            pts_known: false,
            updated: true,
        }
    }

    /// Mean fragment duration, 0 for an empty playlist.
    pub fn average_fragment_duration(&self) -> f64 {
        if self.fragments.is_empty() {
            0.0
        } else {
            self.total_duration / self.fragments.len() as f64
        }
    }

    pub fn fragment(&self, sn: u64) -> Option<&Fragment> {
        let index = sn.checked_sub(self.start_sn)?;
        self.fragments.get(index as usize)
    }
}

/// One variant of the multivariant playlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Level {
    /// Peak bitrate from `BANDWIDTH`, bits/s.
    pub bitrate: u64,
    /// Measured average bitrate of loaded fragments, 0 until measured.
    pub real_bitrate: u64,
    pub loaded: Option<LoadedTotals>,
    pub details: Option<LevelDetails>,
    pub width: u32,
    pub height: u32,
    pub codecs: Option<String>,
    pub url: Option<Url>,
}

impl Level {
    pub fn new(bitrate: u64) -> Self {
        Self {
            bitrate,
            ..Default::default()
        }
    }

    /// Adds a loaded fragment to the running totals and refreshes `real_bitrate`.
    pub fn record_loaded(&mut self, bytes: u64, duration: f64) {
        let totals = self.loaded.get_or_insert_with(LoadedTotals::default);
        totals.bytes += bytes;
        totals.duration += duration;
        if totals.duration > 0.0 {
            self.real_bitrate = (8.0 * totals.bytes as f64 / totals.duration).round() as u64;
        }
    }
}
