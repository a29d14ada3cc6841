//! # Transmuxing
//!
//! Segment bytes in, appendable fMP4 out:
//!
//! 1. whole-segment AES-128 decryption through a [`Decrypter`]
//! 2. probing for a demuxer, kept across fragments until a discontinuity
//!    or level switch brings data it rejects
//! 3. demuxing (SAMPLE-AES samples are decrypted here)
//! 4. remuxing onto the output timeline
//!
//! [`Transmuxer`] does the work; [`TransmuxerInterface`] derives the
//! per-chunk [`TransmuxState`], optionally runs the transmuxer on a tokio
//! task and reports results as [`crate::events::HlsEvent`]s.

pub mod decrypt;
pub mod interface;
pub mod session;
pub mod transmuxer;

pub use decrypt::{DecryptData, Decrypter, EncryptionMethod};
pub use interface::{TransmuxCommand, TransmuxerInterface};
pub use session::{ChunkMetadata, ChunkTiming, FragmentKey, TransmuxConfig, TransmuxState};
pub use transmuxer::{Transmuxer, TransmuxerResult};
