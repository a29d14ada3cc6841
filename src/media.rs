//! The playback element the buffers feed.

use crate::buffer::TimeRanges;

/// Read access to the host's media element.
pub trait MediaElement: Send + Sync {
    /// Playback position, seconds.
    fn current_time(&self) -> f64;

    /// Media duration, `NaN` until known.
    fn duration(&self) -> f64;

    fn playback_rate(&self) -> f64;

    fn paused(&self) -> bool;

    /// Whether the element has data for the current position (ready state
    /// above `HAVE_NOTHING`).
    fn has_data(&self) -> bool;

    fn buffered(&self) -> TimeRanges;
}
