//! Bounded little-endian decoding of fixed-layout records.
//!
//! PE and compound-file headers are position-driven: every field sits at a
//! fixed offset from the previous one. `ByteReader` walks such records with
//! bounds checks, so a short buffer surfaces as [`TagError::Truncated`]
//! instead of a panic.

use crate::error::{TagError, TagResult};

/// A cursor over a byte slice with little-endian integer reads.
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consumes the next `n` bytes.
    pub fn take(&mut self, n: usize) -> TagResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(TagError::Truncated)?;
        if end > self.data.len() {
            return Err(TagError::Truncated);
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> TagResult<()> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> TagResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> TagResult<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> TagResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u64(&mut self) -> TagResult<u64> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(buf))
    }

    /// Reads a fixed-size byte array, e.g. a magic or a CLSID.
    pub fn read_array<const N: usize>(&mut self) -> TagResult<[u8; N]> {
        let bytes = self.take(N)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(bytes);
        Ok(buf)
    }
}
