//! Fragmented MP4 input.
//!
//! fMP4 segments are already in the container the sinks consume, so the
//! demuxer only cuts the byte stream at box boundaries and the passthrough
//! remuxer rebases the decode times.

pub mod boxes;
mod demuxer;

pub use boxes::{find_box, parse_init_segment, InitData};
pub use demuxer::MP4Demuxer;
