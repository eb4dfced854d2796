//! In-memory store

use super::{Sink, Source, StoreError, StoredObject};
use crate::error::BoxError;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Sink and source backed by a map; counts successful puts
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful puts, including overwrites
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::Relaxed)
    }

    /// Stored object, if any
    pub fn object(&self, tenant_id: &str, object_key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .get(&(tenant_id.to_string(), object_key.to_string()))
            .cloned()
    }

    /// Object keys stored for a tenant, sorted
    pub fn keys(&self, tenant_id: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .read()
            .keys()
            .filter(|(t, _)| t == tenant_id)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

impl Sink for MemoryStore {
    fn put(
        &self,
        cancel: &CancellationToken,
        tenant_id: &str,
        object_key: &str,
        content_type: &str,
        data: &[u8],
        meta: &BTreeMap<String, String>,
    ) -> Result<(), BoxError> {
        if cancel.is_cancelled() {
            return Err(Box::new(StoreError::Cancelled));
        }
        let obj = StoredObject {
            content_type: content_type.to_string(),
            data: Bytes::copy_from_slice(data),
            meta: meta.clone(),
        };
        self.objects
            .write()
            .insert((tenant_id.to_string(), object_key.to_string()), obj);
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl Source for MemoryStore {
    fn get(
        &self,
        cancel: &CancellationToken,
        tenant_id: &str,
        object_key: &str,
    ) -> Result<StoredObject, BoxError> {
        if cancel.is_cancelled() {
            return Err(Box::new(StoreError::Cancelled));
        }
        self.object(tenant_id, object_key).ok_or_else(|| {
            Box::new(StoreError::NotFound {
                tenant_id: tenant_id.to_string(),
                object_key: object_key.to_string(),
            }) as BoxError
        })
    }
}
