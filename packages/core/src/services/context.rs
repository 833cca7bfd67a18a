//! Storage context
//!
//! Bundles the collaborators every object needs (local store, remote store,
//! configuration, retry scheduler) so they are passed explicitly instead of
//! reached through globals. Objects hold an `Arc<StorageContext>`.
//!
//! # Examples
//!
//! ```rust
//! use storykeep_core::services::StorageContext;
//! use storykeep_core::models::Story;
//!
//! let context = StorageContext::in_memory();
//! let story = Story::new(&context);
//! story.set_title("Night market");
//! ```

use crate::config::PersistenceConfig;
use crate::db::{FileLocalStore, LocalStore, MemoryLocalStore, MemoryRemoteStore, RemoteStore};
use crate::models::LocalType;
use crate::operations::{PersistError, RetryPolicy};
use crate::services::{FetchQueue, TaskScheduler};
use std::sync::Arc;

pub struct StorageContext {
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    config: PersistenceConfig,
    retry_scheduler: TaskScheduler,
}

impl StorageContext {
    /// Context over the given stores
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `config` fails validation.
    pub fn with_stores(
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        config: PersistenceConfig,
    ) -> Result<Arc<Self>, PersistError> {
        config.validate().map_err(PersistError::invalid_config)?;
        Ok(Arc::new(Self {
            local,
            remote,
            config,
            // Retries must never wait behind a bounded queue their caller holds a slot in
            retry_scheduler: TaskScheduler::unbounded(),
        }))
    }

    /// Context with a disk cache under the configured cache root
    pub async fn with_file_cache(
        config: PersistenceConfig,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Arc<Self>, PersistError> {
        let root = config.resolve_cache_root().ok_or_else(|| {
            PersistError::invalid_config("no cache_root configured and no home directory found")
        })?;
        let local = FileLocalStore::open(&root).await?;
        tracing::info!("Using disk cache at {:?}", root);
        Self::with_stores(Arc::new(local), remote, config)
    }

    /// Context backed entirely by memory, with default configuration
    pub fn in_memory() -> Arc<Self> {
        Arc::new(Self {
            local: Arc::new(MemoryLocalStore::new()),
            remote: Arc::new(MemoryRemoteStore::new()),
            config: PersistenceConfig::default(),
            retry_scheduler: TaskScheduler::unbounded(),
        })
    }

    pub fn local(&self) -> &Arc<dyn LocalStore> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<dyn RemoteStore> {
        &self.remote
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    pub fn retry_scheduler(&self) -> &TaskScheduler {
        &self.retry_scheduler
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    /// A fetch queue sized by `prefetch_concurrency`
    pub fn fetch_queue(&self) -> FetchQueue {
        FetchQueue::new(self.config.prefetch_concurrency)
    }

    /// Drop every record in one local area
    pub async fn delete_all(&self, local_type: LocalType) -> Result<usize, PersistError> {
        let removed = self.local.delete_all(local_type).await?;
        tracing::info!("Deleted {} records from {}", removed, local_type);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behaviors::ObjectDelegate;
    use crate::models::{StorageLocation, Story};
    use tempfile::TempDir;

    #[test]
    fn test_rejects_invalid_config() {
        let config = PersistenceConfig {
            remote_retry_attempts: 0,
            ..PersistenceConfig::default()
        };
        let result = StorageContext::with_stores(
            Arc::new(MemoryLocalStore::new()),
            Arc::new(MemoryRemoteStore::new()),
            config,
        );
        assert!(matches!(result, Err(PersistError::InvalidConfig(_))));

        tokio_test::assert_ok!(StorageContext::with_stores(
            Arc::new(MemoryLocalStore::new()),
            Arc::new(MemoryRemoteStore::new()),
            PersistenceConfig::default(),
        ));
    }

    #[tokio::test]
    async fn test_file_cache_under_configured_root() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let config = PersistenceConfig {
            cache_root: Some(temp_dir.path().to_path_buf()),
            ..PersistenceConfig::default()
        };
        let context =
            StorageContext::with_file_cache(config, Arc::new(MemoryRemoteStore::new())).await?;

        let story = Story::new(&context);
        story
            .save_recursive(StorageLocation::Local, LocalType::Draft, None)
            .await?;
        assert!(temp_dir
            .path()
            .join("draft")
            .join(format!("{}.json", story.id()))
            .exists());

        assert_eq!(context.delete_all(LocalType::Draft).await?, 1);
        assert_eq!(context.delete_all(LocalType::Draft).await?, 0);
        Ok(())
    }

    #[test]
    fn test_fetch_queue_uses_configured_concurrency() {
        let context = StorageContext::in_memory();
        assert_eq!(context.fetch_queue().concurrency_limit(), 3);
    }
}
