//! # Utility Functions and Types
//!
//! Bit-level reading for the packed codec headers and the MPEG-2 CRC used to
//! check PSI sections.
//!
//! ```rust
//! use hlsio::utils::{BitReader, Crc32Mpeg2};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = vec![0b10110011u8];
//! let mut reader = BitReader::new(&data);
//! assert_eq!(reader.read_bits(3)?, 0b101);
//!
//! let crc = Crc32Mpeg2::new();
//! println!("CRC32: {:08x}", crc.calculate(b"Hello, world!"));
//! # Ok(())
//! # }
//! ```

/// Bitstream reading (fixed width fields and Exp-Golomb codes)
pub mod bits;

/// CRC calculation for PSI sections
pub mod crc;

pub use bits::BitReader;
pub use crc::Crc32Mpeg2;
