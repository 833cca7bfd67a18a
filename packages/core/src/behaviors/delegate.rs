//! ObjectDelegate - the contract every persistable object fulfils
//!
//! The recursive drivers in [`crate::operations::coordinator`] only see
//! objects through this trait. An implementation supplies the per-object
//! primitives (retrieve / save / delete of itself against local and remote
//! storage) and its current children; the recursive operations are provided
//! methods built on those.
//!
//! # Callback Ordering
//!
//! Retrieval has two notifications: the `ReadySignal` fires once the
//! object's content is usable, and the returned future completes once all
//! work (including caching and descendants) is done. Ready always happens
//! before completion, never after.

use crate::models::{LocalType, ObjectKind, StorageLocation};
use crate::operations::{coordinator, CancelScope, PersistError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// One-shot "content is usable" notification
///
/// Firing is idempotent: the hook runs on the first `fire` and later calls
/// do nothing.
#[derive(Default)]
pub struct ReadySignal {
    hook: Option<Box<dyn FnOnce() + Send>>,
}

impl ReadySignal {
    pub fn new<F>(hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            hook: Some(Box::new(hook)),
        }
    }

    /// A signal nobody listens to
    pub fn none() -> Self {
        Self { hook: None }
    }

    pub fn fire(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook();
        }
    }

    /// Whether the hook is still waiting to run
    pub fn is_pending(&self) -> bool {
        self.hook.is_some()
    }
}

impl fmt::Debug for ReadySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadySignal")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// Operations the recursive drivers need from a persistable object
///
/// # Thread Safety
///
/// Children are driven from spawned tasks, so implementations must be
/// `Send + Sync` and tolerate concurrent calls on different children.
#[async_trait]
pub trait ObjectDelegate: Send + Sync + 'static {
    //
    // IDENTITY AND STRUCTURE
    //

    /// Stable identifier, unique among objects of the same kind
    fn unique_identifier(&self) -> String;

    fn object_kind(&self) -> ObjectKind;

    /// Whether the object's own record has been loaded (or it was created
    /// locally and has nothing to load)
    fn is_retrieved(&self) -> bool;

    /// Current children, in persistence order
    ///
    /// Only meaningful once the object is retrieved; a shell knows no
    /// children.
    fn children(&self) -> Vec<Arc<dyn ObjectDelegate>>;

    //
    // SELF PRIMITIVES
    //

    /// Load this object's own record from a local area
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` if the area has no record for this object.
    async fn retrieve(&self, local_type: LocalType, force_anyways: bool) -> Result<(), PersistError>;

    /// Load from a local area, falling back to the server
    ///
    /// With `force_anyways` the local copy is skipped. A server copy is
    /// cached into `local_type` after `ready` fires.
    async fn retrieve_from_local_then_server(
        &self,
        force_anyways: bool,
        local_type: LocalType,
        ready: ReadySignal,
    ) -> Result<(), PersistError>;

    /// Write this object's record to a local area
    async fn save(&self, local_type: LocalType) -> Result<(), PersistError>;

    /// Write to a local area, then to the server
    async fn save_to_local_n_server(&self, local_type: LocalType) -> Result<(), PersistError>;

    /// Remove this object's record from a local area
    async fn delete(&self, local_type: LocalType) -> Result<(), PersistError>;

    /// Remove from every local area and from the server
    async fn delete_from_local_n_server(&self) -> Result<(), PersistError>;

    /// Abandon server retrieves in flight for this object and its subtree
    fn cancel_retrieve_from_server_recursive(&self);

    /// Abandon server saves in flight for this object and its subtree
    fn cancel_save_to_server_recursive(&self);

    //
    // RECURSIVE OPERATIONS
    //

    /// Retrieve this object, then every descendant
    ///
    /// `ready` fires once everything is usable, before this returns.
    async fn retrieve_recursive(
        &self,
        location: StorageLocation,
        local_type: LocalType,
        force_anyways: bool,
        parent: Option<&CancelScope>,
        ready: ReadySignal,
    ) -> Result<(), PersistError> {
        coordinator::retrieve_recursive(self, location, local_type, force_anyways, parent, ready)
            .await
    }

    /// Save every descendant, then this object
    async fn save_recursive(
        &self,
        location: StorageLocation,
        local_type: LocalType,
        parent: Option<&CancelScope>,
    ) -> Result<(), PersistError> {
        coordinator::save_recursive(self, location, local_type, parent).await
    }

    /// Save this object only
    async fn save_whole(
        &self,
        location: StorageLocation,
        local_type: LocalType,
        parent: Option<&CancelScope>,
    ) -> Result<(), PersistError> {
        coordinator::save_whole(self, location, local_type, parent).await
    }

    /// Delete every descendant, then this object
    async fn delete_recursive(
        &self,
        location: StorageLocation,
        local_type: LocalType,
        parent: Option<&CancelScope>,
    ) -> Result<(), PersistError> {
        coordinator::delete_recursive(self, location, local_type, parent).await
    }
}
