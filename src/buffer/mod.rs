//! # Buffering
//!
//! Remuxed segments reach the host's sinks through a
//! [`BufferOperationQueue`]: one FIFO per sink, with the head operation in
//! flight until the sink reports completion. Barriers spanning several sinks
//! order cross-sink work (end of stream, duration updates, fragment
//! buffered notifications) after the appends queued before them.
//!
//! [`FragmentTracker`] follows what the sinks actually hold so evicted or
//! partly appended fragments can be loaded again.

pub mod controller;
pub mod helper;
pub mod queue;
pub mod sink;
pub mod tracker;

pub use controller::{BufferContext, BufferController, BufferSegment};
pub use helper::{buffer_info, BufferInfo, TimeRanges};
pub use queue::{BufferOperation, BufferOperationQueue, Dispatch, SinkState};
pub use sink::{MediaSink, MediaSource, SinkError, SinkKind};
pub use tracker::{FragmentState, FragmentTracker};
