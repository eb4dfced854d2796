//! CHTS1 binary chunk format
//!
//! ```text
//! Magic     "CHTS1"  5 bytes
//! Version   u16      1
//! Flags     u16      bit0 = body is gzip-compressed
//! MetaLen   u32
//! MetaJSON  canonical JSON of ChunkMeta
//! Body      see [`body`], raw or gzip per Flags
//! ```
//!
//! All integers are little-endian. The encoder is a pure function of its
//! input: no clocks, no randomness, sorted keys everywhere.

pub mod blob;
pub mod body;
pub mod cursor;
pub mod gzip;
pub mod varint;

pub use blob::{encode_blob, split_blob, BlobHeader};
pub use body::{decode_body, encode_body, BodyCounts, BodyLimits, RawSeries};

/// Blob magic
pub const MAGIC: &[u8; 5] = b"CHTS1";

/// Blob format version
pub const FORMAT_VERSION: u16 = 1;

/// Flags bit: body is gzip-compressed
pub const FLAG_GZIP_BODY: u16 = 1;

/// Every flag bit this version understands
pub const KNOWN_FLAGS: u16 = FLAG_GZIP_BODY;

/// Content type recorded with every stored chunk
pub const CONTENT_TYPE: &str = "application/x-chartly-tschunk";
