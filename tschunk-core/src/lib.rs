//! tschunk core - deterministic time-series chunk codec
//!
//! Turns buffered time-series points into self-describing, CRC-guarded,
//! content-addressed binary chunks ("CHTS1") and back.
//!
//! # Architecture
//!
//! - **Writer**: concurrent per-series ingestion buffer; `flush` sorts,
//!   deduplicates, caps and encodes everything into one chunk
//! - **Codec**: blob header, canonical meta JSON, delta-varint body with
//!   per-series and whole-body CRC32, optional reproducible gzip
//! - **Object keys**: sha256 over canonical content, so equal input always
//!   lands under the same key
//! - **Reader**: the exact inverse of the writer, verifying every checksum
//! - **Compaction / ingestion**: merge decoded chunks or JSON payloads into
//!   new chunks
//! - **Stores**: the `Sink`/`Source` boundary plus memory and filesystem
//!   implementations

pub mod canonical;
pub mod codec;
pub mod compaction;
pub mod ingest;
pub mod merge;
pub mod object_key;
pub mod reader;
pub mod series;
pub mod store;
pub mod writer;

mod error;
mod types;

pub use compaction::{
    compact_decoded_chunks, compact_series_points, compact_to_chunk, CompactResult,
    CompactionOptions, SeriesPoints,
};
pub use error::{BoxError, ChunkError, Result};
pub use ingest::{IngestOptions, IngestPayload, Ingestor, SeriesSet};
pub use reader::{decode, decode_from, DecodedChunk, DecodedPoint, DecodedSeries, ReaderOptions};
pub use series::DuplicatePolicy;
pub use store::{FsStore, MemoryStore, Sink, Source, StoreError, StoredObject};
pub use types::*;
pub use writer::{Writer, WriterOptions, WriterStats};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Points per chunk when the writer is given 0
    pub const MAX_POINTS_PER_CHUNK: usize = 200_000;

    /// Series per chunk when the writer is given 0
    pub const MAX_SERIES_PER_CHUNK: usize = 5_000;

    /// Series longer than this are sorted in shards and k-way merged
    pub const SORT_SHARD_SIZE: usize = 50_000;

    /// Decoder byte limit (64MB)
    pub const READER_MAX_BYTES: usize = 64 * 1024 * 1024;

    /// Decoder series limit
    pub const READER_MAX_SERIES: usize = 10_000;

    /// Decoder total point limit
    pub const READER_MAX_POINTS: usize = 500_000;

    /// Ingestion payload limit, raw or decompressed (64MB)
    pub const INGEST_MAX_BYTES: usize = 64 * 1024 * 1024;

    /// Schema version written when the meta leaves it empty
    pub const DEFAULT_SCHEMA_VERSION: &str = "v1";

    /// Object key prefix used when the caller passes an empty one
    pub const DEFAULT_OBJECT_KEY_PREFIX: &str = "ts";
}
