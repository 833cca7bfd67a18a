//! LocalStore Trait - On-Device Storage Abstraction
//!
//! Objects live on the device in one of two areas (`LocalType::Cache` for
//! server copies, `LocalType::Draft` for unsubmitted work). This trait hides
//! how an area is kept so the orchestration layer can run against memory in
//! tests and against disk in the application.

use crate::db::StoreError;
use crate::models::{LocalType, NodeRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// On-device persistence for node records
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the recursive drivers call into the
/// same store from many spawned tasks at once.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Get a record by id
    ///
    /// - `Ok(Some(record))` if present in the area
    /// - `Ok(None)` if absent (not an error)
    async fn get(&self, local_type: LocalType, id: &str) -> Result<Option<NodeRecord>, StoreError>;

    /// Insert or replace a record
    async fn put(&self, local_type: LocalType, record: NodeRecord) -> Result<(), StoreError>;

    /// Remove a record, returning whether it existed
    async fn delete(&self, local_type: LocalType, id: &str) -> Result<bool, StoreError>;

    /// Remove every record in an area, returning how many were removed
    async fn delete_all(&self, local_type: LocalType) -> Result<usize, StoreError>;
}

/// In-memory local store
///
/// Used by tests and by callers that only need a process-lifetime cache.
#[derive(Default)]
pub struct MemoryLocalStore {
    areas: RwLock<HashMap<LocalType, HashMap<String, NodeRecord>>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held in an area
    pub async fn len(&self, local_type: LocalType) -> usize {
        let areas = self.areas.read().await;
        areas.get(&local_type).map(|a| a.len()).unwrap_or(0)
    }

    pub async fn is_empty(&self, local_type: LocalType) -> bool {
        self.len(local_type).await == 0
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, local_type: LocalType, id: &str) -> Result<Option<NodeRecord>, StoreError> {
        let areas = self.areas.read().await;
        Ok(areas.get(&local_type).and_then(|a| a.get(id)).cloned())
    }

    async fn put(&self, local_type: LocalType, record: NodeRecord) -> Result<(), StoreError> {
        let mut areas = self.areas.write().await;
        areas
            .entry(local_type)
            .or_default()
            .insert(record.id().to_string(), record);
        Ok(())
    }

    async fn delete(&self, local_type: LocalType, id: &str) -> Result<bool, StoreError> {
        let mut areas = self.areas.write().await;
        Ok(areas
            .get_mut(&local_type)
            .map(|a| a.remove(id).is_some())
            .unwrap_or(false))
    }

    async fn delete_all(&self, local_type: LocalType) -> Result<usize, StoreError> {
        let mut areas = self.areas.write().await;
        Ok(areas.remove(&local_type).map(|a| a.len()).unwrap_or(0))
    }
}
