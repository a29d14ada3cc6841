//! Elementary stream codecs: AAC (ADTS), H.264 and MPEG audio.

pub mod aac;
pub mod h264;
pub mod mpeg_audio;

pub use h264::NALUnit;
