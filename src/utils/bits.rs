use crate::{HlsError, Result};

/// A big-endian bit reader over a byte slice.
///
/// Used for the bit-packed headers this crate parses: ADTS, MPEG audio
/// frame headers and H.264 parameter sets (including Exp-Golomb codes).
///
/// ```
/// use hlsio::utils::BitReader;
///
/// let data = [0b1011_0011];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011);
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = self
            .data
            .get(self.byte_offset)
            .ok_or_else(|| HlsError::Codec("bit reader exhausted".into()))?;

        let bit = (byte >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }
        Ok(bit == 1)
    }

    /// Reads `n` bits (at most 32) as an unsigned big-endian number.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(HlsError::Codec(format!("cannot read {} bits at once", n)));
        }
        if (n as usize) > self.available_bits() {
            return Err(HlsError::Codec("bit reader exhausted".into()));
        }

        let mut value = 0u64;
        let mut remaining = n;
        while remaining > 0 {
            let byte = self.data[self.byte_offset];
            let left_in_byte = 8 - self.bit_offset as u32;
            let take = remaining.min(left_in_byte);
            let shift = left_in_byte - take;
            let bits = (byte >> shift) & ((1u16 << take) - 1) as u8;

            value = (value << take) | bits as u64;
            remaining -= take;
            self.bit_offset += take as u8;
            if self.bit_offset == 8 {
                self.bit_offset = 0;
                self.byte_offset += 1;
            }
        }
        Ok(value as u32)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bits(8).map(|v| v as u8)
    }

    pub fn read_flag(&mut self) -> Result<bool> {
        self.read_bit()
    }

    /// Reads an unsigned Exp-Golomb code, ue(v).
    pub fn read_golomb(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(HlsError::Codec("invalid Exp-Golomb code".into()));
            }
        }
        if leading_zeros == 0 {
            return Ok(0);
        }

        let info = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) + info as u64 - 1) as u32)
    }

    /// Reads a signed Exp-Golomb code, se(v). Odd codes map to positive values.
    pub fn read_signed_golomb(&mut self) -> Result<i32> {
        let k = self.read_golomb()?;
        let magnitude = ((k as i64 + 1) >> 1) as i32;
        Ok(if k & 1 == 1 { magnitude } else { -magnitude })
    }

    pub fn skip_golomb(&mut self) -> Result<()> {
        self.read_golomb().map(|_| ())
    }

    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        if n as usize > self.available_bits() {
            return Err(HlsError::Codec("bit reader exhausted".into()));
        }
        let absolute = self.bit_offset as usize + n as usize;
        self.byte_offset += absolute / 8;
        self.bit_offset = (absolute % 8) as u8;
        Ok(())
    }

    pub fn available_bits(&self) -> usize {
        (self.data.len().saturating_sub(self.byte_offset)) * 8 - self.bit_offset as usize
    }
}
