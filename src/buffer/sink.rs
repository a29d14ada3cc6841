use bytes::Bytes;
use thiserror::Error;

use super::helper::TimeRanges;

/// Which sink a chunk or operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SinkKind {
    Audio,
    Video,
    /// A single sink fed with muxed audio and video.
    AudioVideo,
}

impl SinkKind {
    pub fn name(&self) -> &'static str {
        match self {
            SinkKind::Audio => "audio",
            SinkKind::Video => "video",
            SinkKind::AudioVideo => "audiovideo",
        }
    }
}

impl std::fmt::Display for SinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure reported synchronously by a sink call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    /// The sink is full; nothing was appended.
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("{0}")]
    Other(String),
}

impl SinkError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, SinkError::QuotaExceeded)
    }
}

/// An append-only media buffer, the `SourceBuffer` of the host.
///
/// `append_buffer` and `remove` only start work; the host reports completion
/// with `BufferController::on_sink_update_end`, also after a failure.
pub trait MediaSink: Send {
    fn append_buffer(&mut self, data: Bytes) -> Result<(), SinkError>;

    fn remove(&mut self, start: f64, end: f64) -> Result<(), SinkError>;

    /// Whether an append or remove is still in progress.
    fn updating(&self) -> bool;

    fn buffered(&self) -> TimeRanges;
}

/// Owner of the sinks, the `MediaSource` of the host.
pub trait MediaSource: Send {
    fn add_sink(&mut self, kind: SinkKind, mime_type: &str) -> Result<Box<dyn MediaSink>, SinkError>;

    fn is_open(&self) -> bool;

    fn duration(&self) -> f64;

    fn set_duration(&mut self, duration: f64);

    fn end_of_stream(&mut self);
}
