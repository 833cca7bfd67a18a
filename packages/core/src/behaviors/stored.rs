//! Record-backed objects
//!
//! Every concrete object (story, moment, markup, media) persists as one
//! [`NodeRecord`]. Implementing [`StoredObject`] - conversion to and from
//! that record plus the current children - is enough to get the whole
//! [`ObjectDelegate`] contract: the blanket impl here does the store
//! traffic, retry and server-cancellation plumbing the same way for every
//! kind.

use crate::behaviors::{ObjectDelegate, ReadySignal};
use crate::db::StoreError;
use crate::models::{LocalType, NodeRecord, ObjectKind, RetrieveState};
use crate::operations::{with_retry, CancelScope, PersistError};
use crate::services::StorageContext;
use crate::utils::lock;
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};

/// State shared by every persistable object
pub struct ObjectCore {
    id: String,
    context: Arc<StorageContext>,
    state: Mutex<RetrieveState>,
    server_retrieve: Mutex<CancelScope>,
    server_save: Mutex<CancelScope>,
}

impl ObjectCore {
    /// Core for an object created on this device; there is nothing to load
    pub fn created(id: impl Into<String>, context: &Arc<StorageContext>) -> Self {
        Self::with_state(id, context, RetrieveState::ObjectSynced)
    }

    /// Core for an object known only by id
    pub fn shell(id: impl Into<String>, context: &Arc<StorageContext>) -> Self {
        Self::with_state(id, context, RetrieveState::NotAvailable)
    }

    fn with_state(id: impl Into<String>, context: &Arc<StorageContext>, state: RetrieveState) -> Self {
        Self {
            id: id.into(),
            context: context.clone(),
            state: Mutex::new(state),
            server_retrieve: Mutex::new(CancelScope::new()),
            server_save: Mutex::new(CancelScope::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &Arc<StorageContext> {
        &self.context
    }

    pub fn retrieve_state(&self) -> RetrieveState {
        *lock(&self.state)
    }

    pub fn set_retrieve_state(&self, state: RetrieveState) {
        *lock(&self.state) = state;
    }

    pub fn is_retrieved(&self) -> bool {
        self.retrieve_state() == RetrieveState::ObjectSynced
    }

    /// Cancel server retrieves in flight; later ones start fresh
    pub fn cancel_server_retrieve(&self) {
        let mut scope = lock(&self.server_retrieve);
        scope.cancel();
        *scope = CancelScope::new();
    }

    /// Cancel server saves in flight; later ones start fresh
    pub fn cancel_server_save(&self) {
        let mut scope = lock(&self.server_save);
        scope.cancel();
        *scope = CancelScope::new();
    }

    /// Run a server request with retry, abandoning it if `scope` is
    /// cancelled first
    async fn remote_call<T, F, Fut>(
        &self,
        scope: CancelScope,
        action: &str,
        op: F,
    ) -> Result<T, PersistError>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PersistError>> + Send + 'static,
    {
        let name = format!("{} {}", action, self.id);
        tokio::select! {
            biased;
            _ = scope.cancelled() => {
                tracing::debug!("{} cancelled", name);
                Err(PersistError::cancelled(self.id.clone()))
            }
            result = with_retry(
                self.context.retry_scheduler(),
                name.clone(),
                self.context.retry_policy(),
                op,
            ) => result,
        }
    }

    async fn fetch_remote(&self) -> Result<NodeRecord, PersistError> {
        let scope = lock(&self.server_retrieve).clone();
        let remote = self.context.remote().clone();
        let id = self.id.clone();
        self.remote_call(scope, "fetch", move || {
            let remote = remote.clone();
            let id = id.clone();
            async move { remote.fetch(&id).await.map_err(PersistError::from) }
        })
        .await
    }

    async fn save_remote(&self, record: NodeRecord) -> Result<(), PersistError> {
        let scope = lock(&self.server_save).clone();
        let remote = self.context.remote().clone();
        self.remote_call(scope, "save", move || {
            let remote = remote.clone();
            let record = record.clone();
            async move { remote.save(record).await.map_err(PersistError::from) }
        })
        .await
    }

    async fn delete_remote(&self) -> Result<(), PersistError> {
        let remote = self.context.remote().clone();
        let id = self.id.clone();
        // Deletes are not cancellable from the server side
        self.remote_call(CancelScope::new(), "delete", move || {
            let remote = remote.clone();
            let id = id.clone();
            async move { remote.delete(&id).await.map_err(PersistError::from) }
        })
        .await
    }
}

/// An object that persists as a single [`NodeRecord`]
pub trait StoredObject: Send + Sync + 'static {
    fn core(&self) -> &ObjectCore;

    fn kind(&self) -> ObjectKind;

    /// Snapshot of the object's fields, stamped with the current time
    fn to_record(&self) -> NodeRecord;

    /// Replace the object's fields with `record`
    ///
    /// Only called with a record of the object's own kind and id.
    fn apply_record(&self, record: NodeRecord) -> Result<(), PersistError>;

    fn child_objects(&self) -> Vec<Arc<dyn ObjectDelegate>>;
}

/// Validate a loaded record and apply it to `object`
pub(crate) fn apply_loaded<T: StoredObject + ?Sized>(
    object: &T,
    record: NodeRecord,
) -> Result<(), PersistError> {
    let core = object.core();
    if record.kind() != object.kind() {
        return Err(PersistError::kind_mismatch(core.id(), object.kind(), record.kind()));
    }
    if record.id() != core.id() {
        return Err(PersistError::internal(format!(
            "record '{}' loaded for object '{}'",
            record.id(),
            core.id()
        )));
    }
    object.apply_record(record)?;
    core.set_retrieve_state(RetrieveState::ObjectSynced);
    Ok(())
}

#[async_trait]
impl<T: StoredObject> ObjectDelegate for T {
    fn unique_identifier(&self) -> String {
        self.core().id().to_string()
    }

    fn object_kind(&self) -> ObjectKind {
        self.kind()
    }

    fn is_retrieved(&self) -> bool {
        self.core().is_retrieved()
    }

    fn children(&self) -> Vec<Arc<dyn ObjectDelegate>> {
        self.child_objects()
    }

    async fn retrieve(&self, local_type: LocalType, force_anyways: bool) -> Result<(), PersistError> {
        let core = self.core();
        if !force_anyways && core.is_retrieved() {
            return Ok(());
        }

        let record = core
            .context()
            .local()
            .get(local_type, core.id())
            .await?
            .ok_or_else(|| StoreError::not_found(core.id()))?;
        apply_loaded(self, record)?;
        tracing::debug!("{}({}) retrieved from {}", self.kind(), core.id(), local_type);
        Ok(())
    }

    async fn retrieve_from_local_then_server(
        &self,
        force_anyways: bool,
        local_type: LocalType,
        mut ready: ReadySignal,
    ) -> Result<(), PersistError> {
        let core = self.core();
        if !force_anyways && core.is_retrieved() {
            ready.fire();
            return Ok(());
        }

        if !force_anyways {
            if let Some(record) = core.context().local().get(local_type, core.id()).await? {
                apply_loaded(self, record)?;
                tracing::debug!("{}({}) retrieved from {}", self.kind(), core.id(), local_type);
                ready.fire();
                return Ok(());
            }
        }

        let previous = core.retrieve_state();
        core.set_retrieve_state(RetrieveState::Retrieving);
        let record = match core.fetch_remote().await {
            Ok(record) => record,
            Err(e) => {
                core.set_retrieve_state(previous);
                return Err(e);
            }
        };

        if let Err(e) = apply_loaded(self, record.clone()) {
            core.set_retrieve_state(previous);
            return Err(e);
        }
        tracing::debug!("{}({}) retrieved from server", self.kind(), core.id());
        ready.fire();
        // Listeners woken by ready get to run before the cache write
        tokio::task::yield_now().await;

        core.context().local().put(local_type, record).await?;
        Ok(())
    }

    async fn save(&self, local_type: LocalType) -> Result<(), PersistError> {
        let core = self.core();
        core.context().local().put(local_type, self.to_record()).await?;
        tracing::debug!("{}({}) saved to {}", self.kind(), core.id(), local_type);
        Ok(())
    }

    async fn save_to_local_n_server(&self, local_type: LocalType) -> Result<(), PersistError> {
        let core = self.core();
        let record = self.to_record();
        core.context().local().put(local_type, record.clone()).await?;
        core.save_remote(record).await?;
        tracing::debug!("{}({}) saved to {} and server", self.kind(), core.id(), local_type);
        Ok(())
    }

    async fn delete(&self, local_type: LocalType) -> Result<(), PersistError> {
        let core = self.core();
        let existed = core.context().local().delete(local_type, core.id()).await?;
        tracing::debug!(
            "{}({}) deleted from {} (existed: {})",
            self.kind(),
            core.id(),
            local_type,
            existed
        );
        Ok(())
    }

    async fn delete_from_local_n_server(&self) -> Result<(), PersistError> {
        let core = self.core();
        for local_type in LocalType::ALL {
            core.context().local().delete(local_type, core.id()).await?;
        }
        core.delete_remote().await?;
        tracing::debug!("{}({}) deleted everywhere", self.kind(), core.id());
        Ok(())
    }

    fn cancel_retrieve_from_server_recursive(&self) {
        self.core().cancel_server_retrieve();
        for child in self.child_objects() {
            child.cancel_retrieve_from_server_recursive();
        }
    }

    fn cancel_save_to_server_recursive(&self) {
        self.core().cancel_server_save();
        for child in self.child_objects() {
            child.cancel_save_to_server_recursive();
        }
    }
}
