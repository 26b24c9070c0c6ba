//! YAML-snapshot store: a [`MemoryStore`] loaded from and saved back to a
//! file, for driving the CLI without a live server.

use super::memory::MemoryStore;
use super::{Connection, CreateRequest};
use crate::core::error::RemoteError;
use crate::core::resolve::Predicate;
use crate::core::types::{ObjectKind, RemoteRef};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// On-disk snapshot format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub schema: String,
    #[serde(default)]
    pub objects: Vec<RemoteRef>,
}

/// Load a snapshot. Returns None if the file doesn't exist.
pub fn load_snapshot(path: &Path) -> Result<Option<StoreSnapshot>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let snapshot: StoreSnapshot = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid store file {}: {}", path.display(), e))?;
    if snapshot.schema != "1.0" {
        return Err(format!(
            "store file {} has unsupported schema \"{}\"",
            path.display(),
            snapshot.schema
        ));
    }
    Ok(Some(snapshot))
}

/// Save a snapshot atomically (write to temp, then rename).
pub fn save_snapshot(path: &Path, snapshot: &StoreSnapshot) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let yaml = serde_yaml_ng::to_string(snapshot).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}

/// Store backed by a snapshot file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    store: MemoryStore,
}

impl FileStore {
    /// Open the snapshot at `path`; a missing file is an empty store.
    pub fn open(path: &Path) -> Result<Self, String> {
        let objects = load_snapshot(path)?
            .map(|s| s.objects)
            .unwrap_or_default();
        tracing::debug!(path = %path.display(), objects = objects.len(), "opened store file");
        Ok(Self {
            path: path.to_path_buf(),
            store: MemoryStore::with_objects(objects),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.store
    }

    /// Write the committed objects back to disk.
    pub async fn save(&self) -> Result<(), String> {
        let snapshot = StoreSnapshot {
            schema: "1.0".to_string(),
            objects: self.store.objects().await,
        };
        save_snapshot(&self.path, &snapshot)
    }
}

#[async_trait]
impl Connection for FileStore {
    async fn query(
        &self,
        kind: ObjectKind,
        predicate: &Predicate,
    ) -> Result<Vec<RemoteRef>, RemoteError> {
        self.store.query(kind, predicate).await
    }

    async fn create(
        &self,
        kind: ObjectKind,
        request: CreateRequest,
    ) -> Result<RemoteRef, RemoteError> {
        self.store.create(kind, request).await
    }

    async fn execute_batch(&self) -> Result<(), RemoteError> {
        self.store.execute_batch().await
    }

    async fn discard_batch(&self) -> Result<(), RemoteError> {
        self.store.discard_batch().await
    }
}
