//! # MPEG Transport Stream demuxing
//!
//! Turns HLS transport stream segments into elementary samples:
//!
//! - **Framing**: 188-byte packets, resynchronised on three aligned sync bytes
//! - **PSI**: PAT and PMT of the first program, CRC checked
//! - **PES**: reassembly per PID, 33-bit PTS/DTS
//! - **Video**: H.264 access units, keyframes, SPS derived track info and
//!   CEA-608 captions
//! - **Audio**: ADTS AAC or MPEG audio frames, including frames that straddle
//!   PES packets
//! - **Metadata**: ID3 timed metadata PES
//! - **SAMPLE-AES**: sample decryption for encrypted elementary streams
//!
//! ## Example Usage
//!
//! ```rust
//! use bytes::Bytes;
//! use hlsio::format::{Demuxer, TSDemuxer};
//! use hlsio::format::ts::TS_PACKET_SIZE;
//!
//! # fn main() -> hlsio::Result<()> {
//! let mut demuxer = TSDemuxer::new();
//! demuxer.reset_init_segment(None, None, 10.0);
//!
//! // a null packet: nothing to extract
//! let mut packet = vec![0xFFu8; TS_PACKET_SIZE];
//! packet[..4].copy_from_slice(&[0x47, 0x1F, 0xFF, 0x10]);
//! let result = demuxer.demux(Bytes::from(packet), 0.0, false)?;
//! assert!(result.is_empty());
//! # Ok(())
//! # }
//! ```

/// Transport stream demuxer
pub mod demuxer;

/// Packet header and PSI table parsing
pub mod parser;

/// PES reassembly
pub mod pes;

/// SAMPLE-AES sample decryption
pub mod sample_aes;

/// Core TS types and constants
pub mod types;

#[cfg(test)]
pub(crate) mod tests;

pub use demuxer::TSDemuxer;
pub use pes::{PESAssembler, PESPacket};
pub use types::{
    TSHeader,
    PID_PAT,
    STREAM_TYPE_AAC,
    STREAM_TYPE_H264,
    STREAM_TYPE_METADATA,
    TS_PACKET_SIZE,
};
