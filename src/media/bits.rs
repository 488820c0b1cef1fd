//! Bit-level reader for H.264 RBSP parsing

use crate::error::MediaError;

/// Strip emulation prevention bytes (`00 00 03` → `00 00`) from a NAL unit payload
pub fn nal_to_rbsp(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0usize;

    for &b in nal {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }

    out
}

/// MSB-first bit reader with Exp-Golomb support
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_bit(&mut self) -> Result<u32, MediaError> {
        let byte = self.pos / 8;
        if byte >= self.data.len() {
            return Err(MediaError::InvalidSps);
        }
        let bit = (self.data[byte] >> (7 - (self.pos % 8))) & 1;
        self.pos += 1;
        Ok(bit as u32)
    }

    pub fn read_bits(&mut self, n: u32) -> Result<u32, MediaError> {
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()?;
        }
        Ok(value)
    }

    pub fn read_flag(&mut self) -> Result<bool, MediaError> {
        Ok(self.read_bit()? == 1)
    }

    /// Unsigned Exp-Golomb, ue(v)
    pub fn read_ue(&mut self) -> Result<u32, MediaError> {
        let mut leading_zeros = 0u32;
        while self.read_bit()? == 0 {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(MediaError::InvalidSps);
            }
        }
        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }

    /// Signed Exp-Golomb, se(v)
    pub fn read_se(&mut self) -> Result<i32, MediaError> {
        let k = self.read_ue()? as i64;
        let value = if k % 2 == 1 { (k + 1) / 2 } else { -(k / 2) };
        Ok(value as i32)
    }
}
