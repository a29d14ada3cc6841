use std::collections::BTreeMap;

use super::helper::TimeRanges;
use super::sink::SinkKind;
use crate::loader::{Fragment, PlaylistType};

/// Slack allowed between a fragment's PTS range and the buffered range.
const BUFFER_PADDING: f64 = 0.2;

/// Buffering state of a fragment as seen by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentState {
    NotLoaded,
    /// Loaded, appends not finished.
    Appending,
    /// Buffered with holes, or partly evicted.
    Partial,
    Ok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TrackerKey {
    kind: PlaylistType,
    level: usize,
    sn: u64,
}

impl From<&Fragment> for TrackerKey {
    fn from(frag: &Fragment) -> Self {
        Self {
            kind: frag.kind,
            level: frag.level,
            sn: frag.sn,
        }
    }
}

/// Playable sections of a fragment in one sink.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferedRange {
    pub time: Vec<(f64, f64)>,
    pub partial: bool,
}

#[derive(Debug, Clone)]
struct FragmentEntity {
    body: Fragment,
    range: BTreeMap<SinkKind, BufferedRange>,
    buffered: bool,
}

impl FragmentEntity {
    fn is_partial(&self) -> bool {
        self.buffered && self.range.values().any(|range| range.partial)
    }
}

fn pts_range(frag: &Fragment) -> (f64, f64) {
    (frag.start_pts.unwrap_or(frag.start), frag.end_pts.unwrap_or_else(|| frag.end()))
}

fn is_time_buffered(start: f64, end: f64, ranges: &TimeRanges) -> bool {
    for (range_start, range_end) in ranges.iter() {
        let (padded_start, padded_end) = (range_start - BUFFER_PADDING, range_end + BUFFER_PADDING);
        if start >= padded_start && end <= padded_end {
            return true;
        }
        if end <= padded_start {
            return false;
        }
    }
    false
}

/// The parts of `[start, end]` covered by `ranges`, partial when they are
/// not covered by a single range.
pub fn buffered_times(start: f64, end: f64, ranges: &TimeRanges) -> BufferedRange {
    let mut buffered = BufferedRange::default();
    for (range_start, range_end) in ranges.iter() {
        let (padded_start, padded_end) = (range_start - BUFFER_PADDING, range_end + BUFFER_PADDING);
        if start >= padded_start && end <= padded_end {
            buffered.time.push((start.max(range_start), end.min(range_end)));
            break;
        } else if start < padded_end && end > padded_start {
            buffered.time.push((start.max(range_start), end.min(range_end)));
            buffered.partial = true;
        } else if end <= padded_start {
            break;
        }
    }
    buffered
}

/// Tracks which loaded fragments are in the sinks, so evicted or partly
/// appended fragments get loaded again.
#[derive(Debug, Default)]
pub struct FragmentTracker {
    fragments: BTreeMap<TrackerKey, FragmentEntity>,
    time_ranges: BTreeMap<SinkKind, TimeRanges>,
    active_fragment: Option<Fragment>,
}

impl FragmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a loaded fragment. Bitrate test loads are ignored.
    pub fn on_frag_loaded(&mut self, frag: &Fragment) {
        if frag.bitrate_test {
            return;
        }
        self.fragments.insert(
            TrackerKey::from(frag),
            FragmentEntity {
                body: frag.clone(),
                range: BTreeMap::new(),
                buffered: false,
            },
        );
    }

    /// Records the sinks' ranges after an append of `frag`, dropping
    /// fragments the sinks evicted.
    pub fn on_buffer_appended(&mut self, frag: &Fragment, time_ranges: BTreeMap<SinkKind, TimeRanges>) {
        let mut active = frag.clone();
        for (kind, ranges) in &time_ranges {
            self.detect_evicted_fragments(*kind, ranges);
            for (_, end) in ranges.iter() {
                active.appended_pts = Some(active.appended_pts.map_or(end, |pts| pts.max(end)));
            }
        }
        if let Some(entity) = self.fragments.get_mut(&TrackerKey::from(frag)) {
            entity.body.appended_pts = active.appended_pts;
        }
        self.active_fragment = Some(active);
        self.time_ranges = time_ranges;
    }

    /// Classifies a fully appended fragment as complete or partial.
    pub fn on_frag_buffered(&mut self, frag: &Fragment) {
        let Some(entity) = self.fragments.get_mut(&TrackerKey::from(frag)) else {
            return;
        };
        entity.buffered = true;
        // timing learned while parsing
        entity.body.start_pts = frag.start_pts;
        entity.body.end_pts = frag.end_pts;
        entity.body.elementary_streams = frag.elementary_streams.clone();

        let (start, end) = pts_range(frag);
        for (kind, ranges) in &self.time_ranges {
            let holds_stream = match kind {
                SinkKind::AudioVideo => !frag.elementary_streams.is_empty(),
                kind => frag.has_stream(*kind),
            };
            if holds_stream {
                entity.range.insert(*kind, buffered_times(start, end, ranges));
            }
        }
    }

    fn detect_evicted_fragments(&mut self, kind: SinkKind, ranges: &TimeRanges) {
        self.fragments.retain(|key, entity| {
            if !entity.buffered {
                return true;
            }
            let Some(range) = entity.range.get(&kind) else {
                return true;
            };
            let evicted = range
                .time
                .iter()
                .any(|&(start, end)| !is_time_buffered(start, end, ranges));
            if evicted {
                log::debug!("[fragment-tracker] fragment {} of level {} evicted from {} sink", key.sn, key.level, kind);
            }
            !evicted
        });
    }

    /// The fragment being appended when it covers `position`, else a
    /// buffered fragment.
    pub fn get_appended_frag(&self, position: f64, kind: PlaylistType) -> Option<&Fragment> {
        if let Some(active) = self.active_fragment.as_ref() {
            if active.start <= position && active.appended_pts.is_some_and(|pts| position <= pts) {
                return Some(active);
            }
        }
        self.get_buffered_frag(position, kind)
    }

    pub fn get_buffered_frag(&self, position: f64, kind: PlaylistType) -> Option<&Fragment> {
        self.fragments
            .values()
            .filter(|entity| entity.body.kind == kind && entity.buffered)
            .filter(|entity| {
                let (start, end) = pts_range(&entity.body);
                start <= position && position <= end
            })
            .last()
            .map(|entity| &entity.body)
    }

    /// The partial fragment around `time`, preferring the one `time` is
    /// furthest inside.
    pub fn get_partial_fragment(&self, time: f64) -> Option<&Fragment> {
        let mut best: Option<&Fragment> = None;
        let mut best_overlap = 0.0;
        for entity in self.fragments.values().filter(|entity| entity.is_partial()) {
            let (start, end) = pts_range(&entity.body);
            let (start, end) = (start - BUFFER_PADDING, end + BUFFER_PADDING);
            if time >= start && time <= end {
                let padding = (time - start).min(end - time);
                if best_overlap <= padding {
                    best = Some(&entity.body);
                    best_overlap = padding;
                }
            }
        }
        best
    }

    pub fn get_state(&self, frag: &Fragment) -> FragmentState {
        match self.fragments.get(&TrackerKey::from(frag)) {
            None => FragmentState::NotLoaded,
            Some(entity) if !entity.buffered => FragmentState::Appending,
            Some(entity) if entity.is_partial() => FragmentState::Partial,
            Some(_) => FragmentState::Ok,
        }
    }

    pub fn has_fragment(&self, frag: &Fragment) -> bool {
        self.fragments.contains_key(&TrackerKey::from(frag))
    }

    /// Forgets `frag` until it is loaded again.
    pub fn remove_fragment(&mut self, frag: &Fragment) {
        self.fragments.remove(&TrackerKey::from(frag));
    }

    pub fn remove_all_fragments(&mut self) {
        self.fragments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fragment(sn: u64, start: f64, end: f64) -> Fragment {
        let mut frag = Fragment::new(PlaylistType::Main, 0, sn, 0, start, end - start);
        frag.set_elementary_stream_info(SinkKind::Audio, start, end, start, end, false);
        frag.set_elementary_stream_info(SinkKind::Video, start, end, start, end, false);
        frag.start_pts = Some(start);
        frag.end_pts = Some(end);
        frag
    }

    fn ranges(audio: Vec<(f64, f64)>, video: Vec<(f64, f64)>) -> BTreeMap<SinkKind, TimeRanges> {
        BTreeMap::from([
            (SinkKind::Audio, TimeRanges::from(audio)),
            (SinkKind::Video, TimeRanges::from(video)),
        ])
    }

    fn load_and_buffer(tracker: &mut FragmentTracker, frag: &Fragment, time_ranges: BTreeMap<SinkKind, TimeRanges>) {
        tracker.on_frag_loaded(frag);
        tracker.on_buffer_appended(frag, time_ranges);
        tracker.on_frag_buffered(frag);
    }

    #[test]
    fn test_state_transitions() {
        let mut tracker = FragmentTracker::new();
        let frag = fragment(1, 0.0, 1.0);
        assert_eq!(tracker.get_state(&frag), FragmentState::NotLoaded);

        tracker.on_frag_loaded(&frag);
        assert_eq!(tracker.get_state(&frag), FragmentState::Appending);

        tracker.on_buffer_appended(&frag, ranges(vec![(0.0, 1.0)], vec![(0.0, 1.0)]));
        tracker.on_frag_buffered(&frag);
        assert_eq!(tracker.get_state(&frag), FragmentState::Ok);
    }

    #[test]
    fn test_padding_tolerates_small_offsets() {
        let mut tracker = FragmentTracker::new();
        let frag = fragment(1, 0.0, 2.0);
        load_and_buffer(&mut tracker, &frag, ranges(vec![(0.1, 2.15)], vec![(0.0, 1.9)]));
        assert_eq!(tracker.get_state(&frag), FragmentState::Ok);
    }

    #[test]
    fn test_partial_fragment_detected() {
        let mut tracker = FragmentTracker::new();
        let frag = fragment(1, 0.0, 2.0);
        load_and_buffer(&mut tracker, &frag, ranges(vec![(0.0, 2.0)], vec![(0.0, 0.5), (1.5, 2.0)]));

        assert_eq!(tracker.get_state(&frag), FragmentState::Partial);
        assert_eq!(tracker.get_partial_fragment(1.0).map(|f| f.sn), Some(1));
        assert!(tracker.get_partial_fragment(5.0).is_none());
    }

    #[test]
    fn test_evicted_fragment_removed() {
        let mut tracker = FragmentTracker::new();
        let first = fragment(1, 0.0, 1.0);
        let second = fragment(2, 1.0, 2.0);
        load_and_buffer(&mut tracker, &first, ranges(vec![(0.0, 1.0)], vec![(0.0, 1.0)]));

        // the sinks dropped the first second while appending the next fragment
        tracker.on_frag_loaded(&second);
        tracker.on_buffer_appended(&second, ranges(vec![(1.0, 2.0)], vec![(1.0, 2.0)]));
        assert_eq!(tracker.get_state(&first), FragmentState::NotLoaded);
        assert_eq!(tracker.get_state(&second), FragmentState::Appending);
    }

    #[test]
    fn test_appended_and_buffered_lookup() {
        let mut tracker = FragmentTracker::new();
        let first = fragment(1, 0.0, 4.0);
        load_and_buffer(&mut tracker, &first, ranges(vec![(0.0, 4.0)], vec![(0.0, 4.0)]));
        assert_eq!(tracker.get_buffered_frag(2.0, PlaylistType::Main).map(|f| f.sn), Some(1));
        assert!(tracker.get_buffered_frag(2.0, PlaylistType::Audio).is_none());

        let second = fragment(2, 4.0, 8.0);
        tracker.on_frag_loaded(&second);
        tracker.on_buffer_appended(&second, ranges(vec![(0.0, 6.0)], vec![(0.0, 6.0)]));
        assert_eq!(tracker.get_appended_frag(5.0, PlaylistType::Main).map(|f| f.sn), Some(2));
        assert!(tracker.get_appended_frag(7.0, PlaylistType::Main).is_none());
    }

    #[test]
    fn test_bitrate_test_not_tracked() {
        let mut tracker = FragmentTracker::new();
        let mut frag = fragment(1, 0.0, 1.0);
        frag.bitrate_test = true;
        tracker.on_frag_loaded(&frag);
        assert!(!tracker.has_fragment(&frag));

        frag.bitrate_test = false;
        tracker.on_frag_loaded(&frag);
        tracker.remove_all_fragments();
        assert!(!tracker.has_fragment(&frag));
    }
}
