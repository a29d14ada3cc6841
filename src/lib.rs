#![doc(html_root_url = "https://docs.rs/hlsio/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # hlsio - adaptive streaming client core
//!
//! `hlsio` holds the media half of an HLS player: it turns downloaded
//! segments into appendable fMP4, decides which rendition to fetch next and
//! feeds the results to the host's media sinks in order.
//!
//! ## Features
//!
//! ### Transmuxing
//! - MPEG-TS demuxing with H.264, AAC, MPEG audio and ID3/caption side data
//! - fMP4 passthrough, packed ADTS/AAC and MP3 segments
//! - AES-128 segment and SAMPLE-AES sample decryption through a host decrypter
//! - fMP4 generation with timestamp normalization across discontinuities
//! - inline or worker-task execution behind one interface
//!
//! ### Adaptive bitrate
//! - dual-window EWMA bandwidth estimation
//! - buffer-aware level selection
//! - emergency abort of fragment loads that would stall playback
//!
//! ### Buffering
//! - per-sink FIFO append queues with cross-sink barriers
//! - fragment tracking against what the sinks actually hold
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use hlsio::config::HlsConfig;
//! use hlsio::events::{self, HlsEvent};
//! use hlsio::loader::{Fragment, PlaylistType};
//! use hlsio::transmux::{ChunkMetadata, TransmuxConfig, TransmuxerInterface};
//!
//! #[tokio::main]
//! async fn main() -> hlsio::Result<()> {
//!     let config = HlsConfig::load()?;
//!     let (tx, mut rx) = events::channel();
//!     let mut transmuxer = TransmuxerInterface::new(&config, tx, None, PlaylistType::Main);
//!
//!     let frag = Fragment::new(PlaylistType::Main, 0, 0, 0, 0.0, 6.0);
//!     let segment = Bytes::from(std::fs::read("segment0.ts")?);
//!     let meta = ChunkMetadata::new(frag.key(), 0, segment.len());
//!     let transmux_config = TransmuxConfig {
//!         duration: frag.duration,
//!         ..Default::default()
//!     };
//!     transmuxer.push(segment, None, &frag, transmux_config, meta.clone(), true).await?;
//!     transmuxer.flush(meta).await?;
//!
//!     while let Ok(event) = rx.try_recv() {
//!         if let HlsEvent::FragParsingData { data, .. } = event {
//!             println!("{} bytes of {:?}", data.mdat.len(), data.kind);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `format`: segment demuxers (TS, fMP4, AAC, MP3)
//! - `remux`: fMP4 and passthrough remuxers
//! - `transmux`: the demux/remux pipeline and its worker front end
//! - `abr`: bandwidth estimation and level selection
//! - `buffer`: sink append queues and fragment tracking
//! - `loader`: fragments, levels and load statistics
//! - `codec`: AAC, H.264 and MPEG audio bitstream helpers
//! - `events`, `error`, `config`: the ambient plumbing shared by all of them

/// Adaptive bitrate control
pub mod abr;

/// Elementary stream tracks and samples
pub mod av;

/// Sink append queues and buffered range tracking
pub mod buffer;

/// Codec bitstream helpers
pub mod codec;

/// Configuration module
pub mod config;

/// Error types and utilities
pub mod error;

/// Pipeline events
pub mod events;

/// Segment demuxers
pub mod format;

/// Fragments, levels and load statistics
pub mod loader;

/// The host's media element
pub mod media;

/// fMP4 and passthrough remuxers
pub mod remux;

/// Demux/remux pipeline
pub mod transmux;

/// Common utilities and helper functions
pub mod utils;

pub use error::{HlsError, Result};
