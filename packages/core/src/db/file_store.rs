//! File-backed LocalStore
//!
//! Keeps one JSON document per record under `<root>/<area>/<id>.json`.
//! Writes go to a temporary sibling first and are renamed into place, so a
//! reader never observes a half-written record.

use crate::db::{LocalStore, StoreError};
use crate::models::{LocalType, NodeRecord};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Disk cache rooted at a directory
pub struct FileLocalStore {
    root: PathBuf,
}

impl FileLocalStore {
    /// Open (and create if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for local_type in LocalType::ALL {
            let dir = root.join(local_type.as_str());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StoreError::io(&dir, e))?;
        }
        tracing::debug!("FileLocalStore opened at {:?}", root);
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn area_dir(&self, local_type: LocalType) -> PathBuf {
        self.root.join(local_type.as_str())
    }

    fn record_path(&self, local_type: LocalType, id: &str) -> PathBuf {
        self.area_dir(local_type)
            .join(format!("{}.json", sanitize_file_stem(id)))
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn get(&self, local_type: LocalType, id: &str) -> Result<Option<NodeRecord>, StoreError> {
        let path = self.record_path(local_type, id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn put(&self, local_type: LocalType, record: NodeRecord) -> Result<(), StoreError> {
        let path = self.record_path(local_type, record.id());
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&record)?;

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(())
    }

    async fn delete(&self, local_type: LocalType, id: &str) -> Result<bool, StoreError> {
        let path = self.record_path(local_type, id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn delete_all(&self, local_type: LocalType) -> Result<usize, StoreError> {
        let dir = self.area_dir(local_type);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| StoreError::io(&path, e))?;
            removed += 1;
        }

        tracing::debug!("Removed {} records from {} area", removed, local_type);
        Ok(removed)
    }
}

/// Map an identifier to a filesystem-safe file stem
fn sanitize_file_stem(id: &str) -> String {
    id.chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '<' | '>' | '|' | '"' | '.' => '-',
            _ => c,
        })
        .collect()
}
