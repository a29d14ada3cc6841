/// Network timing of a load, in milliseconds on the caller's monotonic clock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadTiming {
    pub start: f64,
    /// First byte received.
    pub first: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParseTiming {
    pub start: f64,
    pub end: f64,
}

/// Progress and timing of one fragment load.
///
/// The loader writes it while bytes arrive; the ABR monitor reads it through
/// an `Arc<parking_lot::Mutex<LoadStats>>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadStats {
    pub aborted: bool,
    /// Bytes received so far.
    pub loaded: u64,
    /// Expected size, 0 while unknown.
    pub total: u64,
    pub retry: u32,
    pub chunk_count: u32,
    /// Bandwidth estimate (bits/s) recorded when the fragment was buffered.
    pub bw_estimate: f64,
    pub loading: LoadTiming,
    pub parsing: ParseTiming,
    pub buffering: LoadTiming,
}

impl LoadStats {
    pub fn new(start_ms: f64) -> Self {
        Self {
            loading: LoadTiming {
                start: start_ms,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Records `bytes` more arriving at `now_ms`.
    pub fn on_progress(&mut self, bytes: u64, now_ms: f64) {
        if self.loaded == 0 && bytes > 0 {
            self.loading.first = now_ms;
        }
        self.loaded += bytes;
        self.chunk_count += 1;
    }

    pub fn is_complete(&self) -> bool {
        self.loading.end > 0.0
    }
}
