//! Signed varints (zig-zag + base-128, least significant group first)

use crate::{ChunkError, Result};
use bytes::BufMut;

/// Maximum encoded length of a 64-bit varint
pub const MAX_VARINT_LEN: usize = 10;

#[inline]
fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

#[inline]
fn unzigzag(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

/// Append a signed varint, returning the number of bytes written
pub fn put_varint<B: BufMut>(buf: &mut B, v: i64) -> usize {
    let mut u = zigzag(v);
    let mut n = 1;
    while u >= 0x80 {
        buf.put_u8((u as u8) | 0x80);
        u >>= 7;
        n += 1;
    }
    buf.put_u8(u as u8);
    n
}

/// Read a signed varint from the front of `data`
///
/// Returns the value and the number of bytes consumed.
pub fn read_varint(data: &[u8]) -> Result<(i64, usize)> {
    let mut u: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in data.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            break;
        }
        if b < 0x80 {
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return Err(ChunkError::InvalidFormat("varint overflows 64 bits".into()));
            }
            u |= (b as u64) << shift;
            return Ok((unzigzag(u), i + 1));
        }
        u |= ((b & 0x7f) as u64) << shift;
        shift += 7;
    }
    if data.len() < MAX_VARINT_LEN {
        Err(ChunkError::InvalidFormat("truncated varint".into()))
    } else {
        Err(ChunkError::InvalidFormat("varint overflows 64 bits".into()))
    }
}
