//! Filesystem store
//!
//! Objects live at `<root>/<tenant>/<object_key>`; the put metadata and
//! content type are kept next to them in a `.meta.json` sidecar. Data is
//! written to a temporary file and renamed into place.

use super::{Sink, Source, StoreError, StoredObject};
use crate::error::BoxError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SIDECAR_SUFFIX: &str = ".meta.json";
const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    content_type: String,
    #[serde(default)]
    meta: BTreeMap<String, String>,
}

/// Sink and source over a local directory
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (and create) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an object is stored at, rejecting anything that could escape the root
    pub fn object_path(&self, tenant_id: &str, object_key: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_component(tenant_id) {
            return Err(StoreError::InvalidPath(format!("tenant {:?}", tenant_id)));
        }
        if object_key.ends_with(SIDECAR_SUFFIX) || object_key.ends_with(TMP_SUFFIX) {
            return Err(StoreError::InvalidPath(format!("reserved suffix in {:?}", object_key)));
        }
        let mut path = self.root.join(tenant_id);
        for part in object_key.split('/') {
            if !is_safe_component(part) {
                return Err(StoreError::InvalidPath(format!("object key {:?}", object_key)));
            }
            path.push(part);
        }
        Ok(path)
    }

    fn write(
        &self,
        path: &Path,
        content_type: &str,
        data: &[u8],
        meta: &BTreeMap<String, String>,
    ) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let sidecar = Sidecar {
            content_type: content_type.to_string(),
            meta: meta.clone(),
        };
        write_atomic(&with_suffix(path, SIDECAR_SUFFIX), &serde_json::to_vec_pretty(&sidecar)?)?;
        write_atomic(path, data)?;
        Ok(())
    }

    fn read(&self, tenant_id: &str, object_key: &str) -> Result<StoredObject, StoreError> {
        let path = self.object_path(tenant_id, object_key)?;
        let data = match fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound {
                    tenant_id: tenant_id.to_string(),
                    object_key: object_key.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let sidecar = match fs::read(with_suffix(&path, SIDECAR_SUFFIX)) {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Sidecar::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(StoredObject {
            content_type: sidecar.content_type,
            data: Bytes::from(data),
            meta: sidecar.meta,
        })
    }
}

impl Sink for FsStore {
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
        let path = self.object_path(tenant_id, object_key)?;
        self.write(&path, content_type, data, meta)?;
        debug!(path = %path.display(), bytes = data.len(), "Stored object");
        Ok(())
    }
}

impl Source for FsStore {
    fn get(
        &self,
        cancel: &CancellationToken,
        tenant_id: &str,
        object_key: &str,
    ) -> Result<StoredObject, BoxError> {
        if cancel.is_cancelled() {
            return Err(Box::new(StoreError::Cancelled));
        }
        Ok(self.read(tenant_id, object_key)?)
    }
}

fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && !s.contains(['/', '\\', '\0', ':'])
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp = with_suffix(path, TMP_SUFFIX);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
