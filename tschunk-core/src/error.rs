//! Error types for the chunk codec

use thiserror::Error;

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, ChunkError>;

/// Boxed error returned by sinks and sources
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Codec error types
#[derive(Error, Debug)]
pub enum ChunkError {
    /// Series key is missing a required field
    #[error("invalid series key: {0}")]
    InvalidKey(String),

    /// Point timestamp or value rejected
    #[error("invalid point: {0}")]
    InvalidPoint(String),

    /// Chunk meta rejected
    #[error("invalid chunk meta: {0}")]
    InvalidMeta(String),

    /// A size bound was exceeded, or nothing was left to write
    #[error("chunk too large: {0}")]
    TooLarge(String),

    /// JSON serialization failed on well-typed input
    #[error("encode failed: {0}")]
    Encode(String),

    /// The sink rejected the blob
    #[error("sink failed: {0}")]
    Sink(#[source] BoxError),

    /// The source could not return the blob
    #[error("source failed: {0}")]
    Source(#[source] BoxError),

    /// Blob bytes do not follow the chunk layout
    #[error("invalid format: {0}")]
    InvalidFormat(String),

    /// Checksum mismatch
    #[error("checksum mismatch in {section}: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        section: &'static str,
        expected: u32,
        actual: u32,
    },

    /// Compression/decompression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Ingestion payload rejected
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChunkError {
    /// Check if error indicates a damaged blob
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ChunkError::InvalidFormat(_)
                | ChunkError::ChecksumMismatch { .. }
                | ChunkError::Compression(_)
        )
    }

    /// Check if error was caused by caller input
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChunkError::InvalidKey(_)
                | ChunkError::InvalidPoint(_)
                | ChunkError::InvalidMeta(_)
                | ChunkError::InvalidPayload(_)
        )
    }
}
