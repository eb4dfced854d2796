//! Blob framing: header, meta section and body

use super::cursor::Cursor;
use super::{FLAG_GZIP_BODY, FORMAT_VERSION, KNOWN_FLAGS, MAGIC};
use crate::{ChunkError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Fixed part of the blob header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    pub version: u16,
    pub flags: u16,
    pub meta_len: u32,
}

impl BlobHeader {
    /// Magic + version + flags + meta length
    pub const SIZE: usize = 5 + 2 + 2 + 4;

    /// Whether the body is gzip-compressed
    pub fn gzip_body(&self) -> bool {
        self.flags & FLAG_GZIP_BODY != 0
    }
}

/// Assemble `magic | version | flags | meta_len | meta | body`
pub fn encode_blob(meta_json: &[u8], flags: u16, body: &[u8]) -> Result<Bytes> {
    let meta_len = u32::try_from(meta_json.len())
        .map_err(|_| ChunkError::TooLarge("meta too large".into()))?;

    let mut buf = BytesMut::with_capacity(BlobHeader::SIZE + meta_json.len() + body.len());
    buf.put_slice(MAGIC);
    buf.put_u16_le(FORMAT_VERSION);
    buf.put_u16_le(flags);
    buf.put_u32_le(meta_len);
    buf.put_slice(meta_json);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Split a blob into its header, meta JSON and (still encoded) body
pub fn split_blob(data: &[u8]) -> Result<(BlobHeader, &[u8], &[u8])> {
    let mut cursor = Cursor::new(data);

    let magic = cursor.read_slice(MAGIC.len(), "header magic")?;
    if magic != MAGIC {
        return Err(ChunkError::InvalidFormat("bad magic".into()));
    }

    let version = cursor.read_u16_le("header version")?;
    if version != FORMAT_VERSION {
        return Err(ChunkError::InvalidFormat(format!(
            "unsupported version: {}",
            version
        )));
    }

    let flags = cursor.read_u16_le("header flags")?;
    if flags & !KNOWN_FLAGS != 0 {
        return Err(ChunkError::InvalidFormat(format!("unknown flags: {:#06x}", flags)));
    }

    let meta_len = cursor.read_u32_le("header meta length")?;
    if meta_len == 0 {
        return Err(ChunkError::InvalidFormat("meta missing".into()));
    }
    let meta = cursor.read_slice(meta_len as usize, "meta")?;
    let body = cursor.rest();
    if body.is_empty() {
        return Err(ChunkError::InvalidFormat("empty body".into()));
    }

    Ok((
        BlobHeader {
            version,
            flags,
            meta_len,
        },
        meta,
        body,
    ))
}
