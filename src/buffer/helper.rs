//! Buffered range queries.

/// Sorted list of buffered `[start, end)` ranges, in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeRanges(Vec<(f64, f64)>);

impl TimeRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn start(&self, index: usize) -> Option<f64> {
        self.0.get(index).map(|r| r.0)
    }

    pub fn end(&self, index: usize) -> Option<f64> {
        self.0.get(index).map(|r| r.1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.0.iter().copied()
    }

    /// Adds `[start, end)`, merging overlapping or touching ranges.
    pub fn add(&mut self, start: f64, end: f64) {
        if end <= start {
            return;
        }
        self.0.push((start, end));
        self.0.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut merged: Vec<(f64, f64)> = Vec::with_capacity(self.0.len());
        for (s, e) in self.0.drain(..) {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        self.0 = merged;
    }

    /// Removes `[start, end)`, splitting a range that straddles it.
    pub fn remove(&mut self, start: f64, end: f64) {
        if end <= start {
            return;
        }
        let mut kept = Vec::with_capacity(self.0.len() + 1);
        for (s, e) in self.0.drain(..) {
            if e <= start || s >= end {
                kept.push((s, e));
                continue;
            }
            if s < start {
                kept.push((s, start));
            }
            if e > end {
                kept.push((end, e));
            }
        }
        self.0 = kept;
    }

    /// Whether `pos` lies inside a range.
    pub fn contains(&self, pos: f64) -> bool {
        self.0.iter().any(|&(s, e)| pos >= s && pos < e)
    }
}

impl From<Vec<(f64, f64)>> for TimeRanges {
    fn from(mut ranges: Vec<(f64, f64)>) -> Self {
        ranges.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self(ranges)
    }
}

/// Buffer around a playback position.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BufferInfo {
    /// Seconds buffered ahead of the position.
    pub len: f64,
    pub start: f64,
    pub end: f64,
    /// Start of the next range after a hole, if any.
    pub next_start: Option<f64>,
}

/// Describes the buffered range containing `pos`, treating holes shorter
/// than `max_hole` as buffered.
///
/// Without a range covering `pos`, `start` and `end` are `pos` and `len` is 0.
pub fn buffer_info(ranges: &TimeRanges, pos: f64, max_hole: f64) -> BufferInfo {
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(ranges.len());
    let mut sorted: Vec<_> = ranges.iter().collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0).then(b.1.total_cmp(&a.1)));
    for (start, end) in sorted {
        match merged.last_mut() {
            Some(last) if max_hole > 0.0 && start - last.1 < max_hole => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }

    let mut info = BufferInfo {
        len: 0.0,
        start: pos,
        end: pos,
        next_start: None,
    };
    for (start, end) in merged {
        if pos + max_hole >= start && pos < end {
            info.start = start;
            info.end = end;
            info.len = end - pos;
        } else if pos + max_hole < start {
            info.next_start = Some(start);
            break;
        }
    }
    info
}
