//! RemoteStore Trait - Backend Abstraction
//!
//! The server tier is an external collaborator (a hosted object backend in the
//! application). The orchestration layer only needs fetch, batch fetch, save
//! and delete by id.

use crate::db::StoreError;
use crate::models::NodeRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Server-side persistence for node records
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch one record; a missing record is `StoreError::NotFound`
    async fn fetch(&self, id: &str) -> Result<NodeRecord, StoreError>;

    /// Fetch several records in one request
    ///
    /// Records that do not exist are omitted from the result. The default
    /// implementation issues one `fetch` per id.
    async fn fetch_batch(&self, ids: &[String]) -> Result<Vec<NodeRecord>, StoreError> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            match self.fetch(id).await {
                Ok(record) => records.push(record),
                Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(records)
    }

    /// Insert or replace a record
    async fn save(&self, record: NodeRecord) -> Result<(), StoreError>;

    /// Remove a record; removing an absent record succeeds
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// In-memory stand-in for the backend
///
/// Mirrors a network round trip with an optional fixed delay so callback
/// ordering in tests resembles production.
pub struct MemoryRemoteStore {
    records: Mutex<HashMap<String, NodeRecord>>,
    latency: Option<Duration>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            latency: None,
        }
    }

    /// Create a store that sleeps `latency` before every request
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            latency: Some(latency),
        }
    }

    /// Create a store pre-populated with records
    pub fn with_records(records: Vec<NodeRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.id().to_string(), r))
            .collect();
        Self {
            records: Mutex::new(map),
            latency: None,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records
            .lock()
            .map(|records| records.contains_key(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn simulate_network_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch(&self, id: &str) -> Result<NodeRecord, StoreError> {
        self.simulate_network_delay().await;

        let records = self
            .records
            .lock()
            .map_err(|_| StoreError::lock_poisoned("remote records"))?;
        records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(id))
    }

    async fn fetch_batch(&self, ids: &[String]) -> Result<Vec<NodeRecord>, StoreError> {
        self.simulate_network_delay().await;

        let records = self
            .records
            .lock()
            .map_err(|_| StoreError::lock_poisoned("remote records"))?;
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn save(&self, record: NodeRecord) -> Result<(), StoreError> {
        self.simulate_network_delay().await;

        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::lock_poisoned("remote records"))?;
        records.insert(record.id().to_string(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.simulate_network_delay().await;

        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::lock_poisoned("remote records"))?;
        records.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StoryRecord;

    #[tokio::test]
    async fn test_fetch_missing_is_not_found() {
        let store = MemoryRemoteStore::new();
        let err = store.fetch("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_batch_skips_missing_records() {
        let store = MemoryRemoteStore::with_records(vec![
            NodeRecord::Story(StoryRecord::new("a")),
            NodeRecord::Story(StoryRecord::new("c")),
        ]);

        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let records = store.fetch_batch(&ids).await.unwrap();
        let found: Vec<&str> = records.iter().map(|r| r.id()).collect();
        assert_eq!(found, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_save_then_delete() {
        let store = MemoryRemoteStore::with_latency(Duration::from_millis(1));
        store
            .save(NodeRecord::Story(StoryRecord::new("a")))
            .await
            .unwrap();
        assert!(store.contains("a"));

        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert!(store.is_empty());
    }
}
