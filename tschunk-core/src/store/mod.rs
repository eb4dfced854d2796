//! Object store boundary
//!
//! The writer only ever talks to a [`Sink`] and the decoder to a [`Source`].
//! Both are synchronous; cancellation arrives as a [`CancellationToken`] and
//! it is up to the implementation how promptly it is honored.

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::error::BoxError;
use bytes::Bytes;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Destination for encoded chunks
pub trait Sink: Send + Sync {
    /// Store `data` under `tenant_id`/`object_key`
    fn put(
        &self,
        cancel: &CancellationToken,
        tenant_id: &str,
        object_key: &str,
        content_type: &str,
        data: &[u8],
        meta: &BTreeMap<String, String>,
    ) -> Result<(), BoxError>;
}

/// Origin of stored chunks
pub trait Source: Send + Sync {
    /// Fetch the object stored under `tenant_id`/`object_key`
    fn get(
        &self,
        cancel: &CancellationToken,
        tenant_id: &str,
        object_key: &str,
    ) -> Result<StoredObject, BoxError>;
}

/// One stored blob with its put metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content_type: String,
    pub data: Bytes,
    pub meta: BTreeMap<String, String>,
}

/// Errors raised by the bundled stores
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("object not found: {tenant_id}/{object_key}")]
    NotFound {
        tenant_id: String,
        object_key: String,
    },

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl StoreError {
    /// Find a `StoreError` behind a boxed sink/source error
    pub fn from_boxed(err: &BoxError) -> Option<&StoreError> {
        err.downcast_ref::<StoreError>()
    }

    /// Check if the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl<T: Sink + ?Sized> Sink for std::sync::Arc<T> {
    fn put(
        &self,
        cancel: &CancellationToken,
        tenant_id: &str,
        object_key: &str,
        content_type: &str,
        data: &[u8],
        meta: &BTreeMap<String, String>,
    ) -> Result<(), BoxError> {
        (**self).put(cancel, tenant_id, object_key, content_type, data, meta)
    }
}

impl<T: Source + ?Sized> Source for std::sync::Arc<T> {
    fn get(
        &self,
        cancel: &CancellationToken,
        tenant_id: &str,
        object_key: &str,
    ) -> Result<StoredObject, BoxError> {
        (**self).get(cancel, tenant_id, object_key)
    }
}
