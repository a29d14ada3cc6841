//! # H.264/AVC bitstream helpers
//!
//! What the TS demuxer needs to turn PES payloads into access units:
//!
//! - Annex B start code splitting
//! - SPS parsing for dimensions, sample aspect ratio and the codec string
//! - slice type detection for non-IDR keyframes
//! - caption user data from SEI messages
//!
//! ```rust
//! use bytes::Bytes;
//! use hlsio::codec::h264::{split_annexb, NALUnit};
//!
//! let stream = Bytes::from_static(&[0, 0, 0, 1, 0x67, 0x42, 0, 0, 1, 0x65, 0x88]);
//! let types: Vec<u8> = split_annexb(&stream)
//!     .units
//!     .into_iter()
//!     .filter_map(NALUnit::new)
//!     .map(|nal| nal.nal_type)
//!     .collect();
//! assert_eq!(types, vec![7, 5]);
//! ```

pub mod parser;
pub mod types;

#[cfg(test)]
mod parser_test;

#[doc(inline)]
pub use parser::*;
#[doc(inline)]
pub use types::*;
