//! Bounds-checked little-endian reader over a byte slice

use crate::{ChunkError, Result};
use bytes::Buf;

/// Read cursor that fails with `InvalidFormat` instead of panicking on short input
#[derive(Debug)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Create a cursor at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Up to `n` bytes from the current position without consuming them
    pub fn peek(&self, n: usize) -> &'a [u8] {
        let end = self.pos + n.min(self.remaining());
        &self.data[self.pos..end]
    }

    /// Consume `n` bytes already inspected through [`peek`](Self::peek)
    pub fn advance(&mut self, n: usize) {
        self.pos += n.min(self.remaining());
    }

    /// Consume and return the next `n` bytes
    pub fn read_slice(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        self.ensure(n, what)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u16_le(&mut self, what: &str) -> Result<u16> {
        Ok(self.read_slice(2, what)?.get_u16_le())
    }

    pub fn read_u32_le(&mut self, what: &str) -> Result<u32> {
        Ok(self.read_slice(4, what)?.get_u32_le())
    }

    pub fn read_i64_le(&mut self, what: &str) -> Result<i64> {
        Ok(self.read_slice(8, what)?.get_i64_le())
    }

    pub fn read_f64_le(&mut self, what: &str) -> Result<f64> {
        Ok(self.read_slice(8, what)?.get_f64_le())
    }

    /// Everything not consumed yet
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    fn ensure(&self, n: usize, what: &str) -> Result<()> {
        if self.remaining() < n {
            return Err(ChunkError::InvalidFormat(format!(
                "truncated {}: need {} bytes, have {}",
                what,
                n,
                self.remaining()
            )));
        }
        Ok(())
    }
}
