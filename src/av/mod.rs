//! Elementary stream model shared by the demuxers and remuxers.
//!
//! Demuxers fill [`AudioTrack`], [`VideoTrack`], [`MetadataTrack`] and
//! [`TextTrack`] with 90 kHz timestamped samples; remuxers consume them.

mod track;
pub use track::*;
