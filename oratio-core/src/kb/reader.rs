//! Bounds-checked cursor over a knowledge-base byte region.
//!
//! Every header walk goes through this reader so a truncated file surfaces
//! as `FileCorrupt` at specialization time instead of an out-of-range index
//! later.

use crate::error::{OratioError, Result};

pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> ByteReader<'a> {
        ByteReader { data, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(OratioError::FileCorrupt("truncated header"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        let b = self
            .data
            .get(self.pos..self.pos + 2)
            .ok_or(OratioError::FileCorrupt("truncated header"))?;
        self.pos += 2;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        let b = self
            .data
            .get(self.pos..self.pos + 4)
            .ok_or(OratioError::FileCorrupt("truncated header"))?;
        self.pos += 4;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Borrow `n` bytes and advance.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let b = self
            .data
            .get(self.pos..self.pos + n)
            .ok_or(OratioError::FileCorrupt("truncated data block"))?;
        self.pos += n;
        Ok(b)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if self.pos + n > self.data.len() {
            return Err(OratioError::FileCorrupt("truncated data block"));
        }
        self.pos += n;
        Ok(())
    }

    /// Read a null-terminated string and advance past the terminator.
    pub fn c_string(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let nul = self.data[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(OratioError::FileCorrupt("unterminated string"))?;
        let s = std::str::from_utf8(&self.data[start..start + nul])
            .map_err(|_| OratioError::FileCorrupt("string is not utf-8"))?;
        self.pos = start + nul + 1;
        Ok(s)
    }
}

/// Checked little-endian u16 at an absolute offset.
pub fn u16_le_at(data: &[u8], pos: usize) -> Option<u16> {
    let b = data.get(pos..pos + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_mixed_fields() {
        let data = [0x01, 0x34, 0x12, 0xdd, 0xcc, 0xbb, 0xaa, b'h', b'i', 0, 9];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.u8().unwrap(), 1);
        assert_eq!(r.u16_le().unwrap(), 0x1234);
        assert_eq!(r.u32_le().unwrap(), 0xaabbccdd);
        assert_eq!(r.c_string().unwrap(), "hi");
        assert_eq!(r.u8().unwrap(), 9);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn truncation_is_file_corrupt() {
        let mut r = ByteReader::new(&[0x01]);
        assert!(matches!(r.u16_le(), Err(OratioError::FileCorrupt(_))));
        let mut r = ByteReader::new(&[b'x', b'y']);
        assert!(matches!(r.c_string(), Err(OratioError::FileCorrupt(_))));
    }
}
