//! Reproducible gzip
//!
//! The gzip header carries a file name, comment, OS byte and mtime. All of
//! them are pinned (no name, no comment, OS 255, mtime 0) so equal input
//! always compresses to equal bytes.

use crate::{ChunkError, Result};
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use std::io::{Read, Write};

const OS_UNKNOWN: u8 = 255;

/// Compress with a fixed header
pub fn compress(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder: GzEncoder<Vec<u8>> = GzBuilder::new()
        .mtime(0)
        .operating_system(OS_UNKNOWN)
        .write(Vec::with_capacity(input.len() / 2 + 64), Compression::default());
    encoder
        .write_all(input)
        .map_err(|e| ChunkError::Encode(format!("gzip: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| ChunkError::Encode(format!("gzip: {}", e)))
}

/// Decompress, failing once the output would exceed `max_bytes` (0 = unbounded)
///
/// Only the first gzip member is read; anything after it is ignored.
pub fn decompress(input: &[u8], max_bytes: usize) -> Result<Vec<u8>> {
    inflate(input, max_bytes).map(|(out, _)| out)
}

/// Decompress a chunk body written by [`compress`]
///
/// The input must be exactly one member with the pinned header: trailing
/// bytes or any header or stream byte that differs from what [`compress`]
/// produces for the inflated data is rejected.
pub fn decompress_canonical(input: &[u8], max_bytes: usize) -> Result<Vec<u8>> {
    let (out, rest) = inflate(input, max_bytes)?;
    if rest != 0 {
        return Err(ChunkError::InvalidFormat(format!(
            "{} trailing bytes after gzip body",
            rest
        )));
    }
    if compress(&out)? != input {
        return Err(ChunkError::InvalidFormat("non-canonical gzip body".into()));
    }
    Ok(out)
}

/// Inflate one member, returning the output and the count of unread input bytes
fn inflate(input: &[u8], max_bytes: usize) -> Result<(Vec<u8>, usize)> {
    let mut decoder = GzDecoder::new(input);
    let mut out = Vec::new();
    if max_bytes > 0 {
        decoder
            .by_ref()
            .take(max_bytes as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| ChunkError::Compression(e.to_string()))?;
        if out.len() > max_bytes {
            return Err(ChunkError::TooLarge(format!(
                "decompressed body exceeds {} bytes",
                max_bytes
            )));
        }
    } else {
        decoder
            .read_to_end(&mut out)
            .map_err(|e| ChunkError::Compression(e.to_string()))?;
    }
    Ok((out, decoder.into_inner().len()))
}

/// Check for the gzip magic bytes
pub fn looks_like_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}
