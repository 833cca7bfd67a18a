//! Recursive operation coordination
//!
//! Every recursive save / retrieve / delete fans out to the node's children
//! and must not finish until each child has reported. The
//! [`OperationCoordinator`] holds that bookkeeping for one invocation:
//!
//! - `outstanding_child_operations` counts children that have not completed
//! - `outstanding_child_readies` counts children whose content is not usable
//!   yet (retrieval only)
//! - `operation_error` keeps the first child failure; later failures are
//!   logged and dropped
//!
//! # Architecture
//!
//! ```text
//! retrieve_recursive(story)
//!   ├─ retrieve self
//!   ├─ spawn child ──► moment A ──ready──┐
//!   ├─ spawn child ──► moment B ──ready──┤  mpsc (readies)
//!   │                     │              ▼
//!   │                  complete ──► JoinSet (completions)
//!   └─ driver loop: readies first, then completions, until settled
//! ```
//!
//! The coordinator is owned by the driver future, which is the only place
//! child reports are consumed, so its counters are never touched
//! concurrently. A fresh coordinator per invocation means two overlapping
//! operations on the same node cannot corrupt each other's counts.

use crate::behaviors::{ObjectDelegate, ReadySignal};
use crate::models::{LocalType, StorageLocation};
use crate::operations::{CancelScope, PersistError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

/// Outcome of reporting one child completion
#[derive(Debug)]
pub enum ChildSettlement {
    /// Other children are still running
    Pending,
    /// That was the last child; carries the first error, if any
    Settled(Option<PersistError>),
}

/// Child bookkeeping for one recursive invocation on one node
#[derive(Debug)]
pub struct OperationCoordinator {
    owner: String,
    operation_error: Option<PersistError>,
    outstanding_child_operations: usize,
    outstanding_child_readies: usize,
}

impl OperationCoordinator {
    pub fn new(owner: impl Into<String>, child_count: usize) -> Self {
        Self {
            owner: owner.into(),
            operation_error: None,
            outstanding_child_operations: child_count,
            outstanding_child_readies: child_count,
        }
    }

    /// Record that `child` finished
    ///
    /// # Panics
    ///
    /// Panics if no child operation is outstanding; a child reporting twice
    /// is a bug in the driver.
    pub fn child_completed(
        &mut self,
        child: &str,
        result: Result<(), PersistError>,
    ) -> ChildSettlement {
        if self.outstanding_child_operations == 0 {
            panic!(
                "{}: outstanding child operations would drop below zero on completion of {}",
                self.owner, child
            );
        }

        if let Err(e) = result {
            if self.operation_error.is_none() {
                tracing::debug!("{}: child {} failed: {}", self.owner, child, e);
                self.operation_error = Some(e);
            } else {
                tracing::warn!(
                    "{}: child {} also failed, keeping the first error: {}",
                    self.owner,
                    child,
                    e
                );
            }
        }

        self.outstanding_child_operations -= 1;
        tracing::debug!(
            "{}: child {} completed, {} outstanding",
            self.owner,
            child,
            self.outstanding_child_operations
        );

        if self.outstanding_child_operations == 0 {
            ChildSettlement::Settled(self.operation_error.take())
        } else {
            ChildSettlement::Pending
        }
    }

    /// Record that `child` is ready; `true` once every child is
    ///
    /// # Panics
    ///
    /// Panics if no child ready is outstanding.
    pub fn child_ready(&mut self, child: &str) -> bool {
        if self.outstanding_child_readies == 0 {
            panic!(
                "{}: outstanding child readies would drop below zero on ready of {}",
                self.owner, child
            );
        }
        self.outstanding_child_readies -= 1;
        self.outstanding_child_readies == 0
    }

    pub fn outstanding_child_operations(&self) -> usize {
        self.outstanding_child_operations
    }

    pub fn outstanding_child_readies(&self) -> usize {
        self.outstanding_child_readies
    }

    /// First child error recorded so far
    pub fn operation_error(&self) -> Option<&PersistError> {
        self.operation_error.as_ref()
    }
}

fn describe<N: ObjectDelegate + ?Sized>(node: &N) -> String {
    format!("{}({})", node.object_kind(), node.unique_identifier())
}

/// Run `run` for every child concurrently and settle their reports
///
/// Readies are drained before completions, so a child's ready is always
/// counted before its completion. `ready` fires when the last child ready
/// arrives.
async fn settle_children<F, Fut>(
    coordinator: &mut OperationCoordinator,
    children: Vec<Arc<dyn ObjectDelegate>>,
    ready: &mut ReadySignal,
    run: F,
) -> Option<PersistError>
where
    F: Fn(Arc<dyn ObjectDelegate>, ReadySignal) -> Fut + Send,
    Fut: Future<Output = Result<(), PersistError>> + Send + 'static,
{
    let mut join_set = JoinSet::new();
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<String>();

    for child in children {
        let label = describe(child.as_ref());
        let tx = ready_tx.clone();
        let ready_label = label.clone();
        let child_ready = ReadySignal::new(move || {
            let _ = tx.send(ready_label);
        });
        let operation = run(child, child_ready);
        join_set.spawn(async move { (label, operation.await) });
    }
    drop(ready_tx);

    let mut readies_open = true;
    loop {
        tokio::select! {
            biased;
            label = ready_rx.recv(), if readies_open => match label {
                Some(label) => {
                    if coordinator.child_ready(&label) {
                        ready.fire();
                    }
                }
                None => readies_open = false,
            },
            joined = join_set.join_next() => match joined {
                Some(Ok((label, result))) => {
                    if let ChildSettlement::Settled(error) = coordinator.child_completed(&label, result) {
                        return error;
                    }
                }
                Some(Err(e)) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Some(Err(e)) => {
                    return Some(PersistError::internal(format!(
                        "child operation aborted: {}",
                        e
                    )));
                }
                None => unreachable!("children drained without settling"),
            },
        }
    }
}

async fn retrieve_self<N: ObjectDelegate + ?Sized>(
    node: &N,
    location: StorageLocation,
    local_type: LocalType,
    force_anyways: bool,
    mut loaded: ReadySignal,
) -> Result<(), PersistError> {
    match location {
        StorageLocation::Local => {
            node.retrieve(local_type, force_anyways).await?;
            loaded.fire();
            Ok(())
        }
        StorageLocation::Both => {
            node.retrieve_from_local_then_server(force_anyways, local_type, loaded)
                .await
        }
    }
}

/// Load a shell before it is written, so its stored fields and children are
/// not replaced by empty ones
///
/// A shell with nothing stored cannot be saved; the load error is returned.
async fn load_before_save<N: ObjectDelegate + ?Sized>(
    node: &N,
    location: StorageLocation,
    local_type: LocalType,
) -> Result<(), PersistError> {
    if node.is_retrieved() {
        return Ok(());
    }
    tracing::debug!("{}: loading before save", describe(node));
    retrieve_self(node, location, local_type, false, ReadySignal::none()).await
}

async fn save_self<N: ObjectDelegate + ?Sized>(
    node: &N,
    location: StorageLocation,
    local_type: LocalType,
) -> Result<(), PersistError> {
    match location {
        StorageLocation::Local => node.save(local_type).await,
        StorageLocation::Both => node.save_to_local_n_server(local_type).await,
    }
}

async fn delete_self<N: ObjectDelegate + ?Sized>(
    node: &N,
    location: StorageLocation,
    local_type: LocalType,
) -> Result<(), PersistError> {
    match location {
        StorageLocation::Local => node.delete(local_type).await,
        StorageLocation::Both => node.delete_from_local_n_server().await,
    }
}

/// Retrieve `node`, then every descendant
///
/// `ready` fires once the node and all descendants are usable, and always
/// before this returns `Ok`. On failure it fires only if every child had
/// already reported ready.
pub async fn retrieve_recursive<N: ObjectDelegate + ?Sized>(
    node: &N,
    location: StorageLocation,
    local_type: LocalType,
    force_anyways: bool,
    parent: Option<&CancelScope>,
    mut ready: ReadySignal,
) -> Result<(), PersistError> {
    let scope = CancelScope::child_of(parent);
    let name = describe(node);
    scope.check(&node.unique_identifier())?;

    // Children are only known once the node itself is loaded. A leaf is
    // ready as soon as its record is applied, before it is cached.
    let (loaded_tx, mut loaded_rx) = oneshot::channel::<()>();
    let loaded = ReadySignal::new(move || {
        let _ = loaded_tx.send(());
    });
    let retrieval = retrieve_self(node, location, local_type, force_anyways, loaded);
    tokio::pin!(retrieval);
    let finished = tokio::select! {
        biased;
        Ok(()) = &mut loaded_rx => None,
        result = &mut retrieval => Some(result),
    };
    match finished {
        Some(result) => result?,
        None => {
            if node.children().is_empty() {
                ready.fire();
            }
            retrieval.await?;
        }
    }

    let children = node.children();
    if children.is_empty() {
        ready.fire();
        return Ok(());
    }

    tracing::debug!(
        "{}: retrieving {} children from {} {}",
        name,
        children.len(),
        location,
        local_type
    );
    let mut coordinator = OperationCoordinator::new(name, children.len());
    let child_scope = scope.clone();
    let error = settle_children(&mut coordinator, children, &mut ready, move |child, child_ready| {
        let scope = child_scope.clone();
        async move {
            child
                .retrieve_recursive(location, local_type, force_anyways, Some(&scope), child_ready)
                .await
        }
    })
    .await;

    match error {
        Some(e) => Err(e),
        None => {
            ready.fire();
            Ok(())
        }
    }
}

/// Save every descendant, then `node`
///
/// A node that has not been loaded is loaded first. If any child fails the node itself is not saved and the first child
/// error is returned.
pub async fn save_recursive<N: ObjectDelegate + ?Sized>(
    node: &N,
    location: StorageLocation,
    local_type: LocalType,
    parent: Option<&CancelScope>,
) -> Result<(), PersistError> {
    let scope = CancelScope::child_of(parent);
    let name = describe(node);
    let id = node.unique_identifier();
    scope.check(&id)?;
    load_before_save(node, location, local_type).await?;

    let children = node.children();
    if !children.is_empty() {
        tracing::debug!(
            "{}: saving {} children to {} {}",
            name,
            children.len(),
            location,
            local_type
        );
        let mut coordinator = OperationCoordinator::new(name.clone(), children.len());
        let child_scope = scope.clone();
        let error = settle_children(
            &mut coordinator,
            children,
            &mut ReadySignal::none(),
            move |child, _| {
                let scope = child_scope.clone();
                async move { child.save_recursive(location, local_type, Some(&scope)).await }
            },
        )
        .await;

        if let Some(e) = error {
            tracing::warn!("{}: not saving self after child failure: {}", name, e);
            return Err(e);
        }
    }

    scope.check(&id)?;
    save_self(node, location, local_type).await
}

/// Save `node` alone, leaving its children untouched
pub async fn save_whole<N: ObjectDelegate + ?Sized>(
    node: &N,
    location: StorageLocation,
    local_type: LocalType,
    parent: Option<&CancelScope>,
) -> Result<(), PersistError> {
    let scope = CancelScope::child_of(parent);
    scope.check(&node.unique_identifier())?;
    load_before_save(node, location, local_type).await?;
    save_self(node, location, local_type).await
}

/// Delete every descendant, then `node`
///
/// A node that has not been loaded is retrieved first so its children are
/// known. If nothing is stored for it, whatever children it holds in memory
/// are deleted.
pub async fn delete_recursive<N: ObjectDelegate + ?Sized>(
    node: &N,
    location: StorageLocation,
    local_type: LocalType,
    parent: Option<&CancelScope>,
) -> Result<(), PersistError> {
    let scope = CancelScope::child_of(parent);
    let name = describe(node);
    let id = node.unique_identifier();
    scope.check(&id)?;

    if !node.is_retrieved() {
        match retrieve_self(node, location, local_type, false, ReadySignal::none()).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!("{}: nothing stored, deleting known children only", name);
            }
            Err(e) => return Err(e),
        }
    }

    let children = node.children();
    if !children.is_empty() {
        tracing::debug!(
            "{}: deleting {} children from {} {}",
            name,
            children.len(),
            location,
            local_type
        );
        let mut coordinator = OperationCoordinator::new(name, children.len());
        let child_scope = scope.clone();
        let error = settle_children(
            &mut coordinator,
            children,
            &mut ReadySignal::none(),
            move |child, _| {
                let scope = child_scope.clone();
                async move { child.delete_recursive(location, local_type, Some(&scope)).await }
            },
        )
        .await;

        if let Some(e) = error {
            return Err(e);
        }
    }

    scope.check(&id)?;
    delete_self(node, location, local_type).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StoreError;

    #[test]
    fn test_settles_after_last_child() {
        let mut coordinator = OperationCoordinator::new("Story(s1)", 3);
        assert!(matches!(
            coordinator.child_completed("a", Ok(())),
            ChildSettlement::Pending
        ));
        assert!(matches!(
            coordinator.child_completed("b", Ok(())),
            ChildSettlement::Pending
        ));
        assert!(matches!(
            coordinator.child_completed("c", Ok(())),
            ChildSettlement::Settled(None)
        ));
        assert_eq!(coordinator.outstanding_child_operations(), 0);
    }

    #[test]
    fn test_first_error_wins() {
        let mut coordinator = OperationCoordinator::new("Story(s1)", 3);
        coordinator.child_completed("a", Err(StoreError::remote("disk full").into()));
        coordinator.child_completed("b", Err(StoreError::remote("network timeout").into()));
        assert_eq!(
            coordinator.operation_error().map(|e| e.to_string()),
            Some("disk full".to_string())
        );

        match coordinator.child_completed("c", Ok(())) {
            ChildSettlement::Settled(Some(e)) => assert_eq!(e.to_string(), "disk full"),
            other => panic!("expected settled error, got {:?}", other),
        }
    }

    #[test]
    fn test_single_failure_among_successes() {
        let mut coordinator = OperationCoordinator::new("Story(p)", 2);
        coordinator.child_completed("A", Ok(()));
        match coordinator.child_completed("B", Err(StoreError::remote("network timeout").into())) {
            ChildSettlement::Settled(Some(e)) => assert_eq!(e.to_string(), "network timeout"),
            other => panic!("expected settled error, got {:?}", other),
        }
    }

    #[test]
    #[should_panic(expected = "below zero")]
    fn test_extra_completion_panics() {
        let mut coordinator = OperationCoordinator::new("Moment(m1)", 1);
        coordinator.child_completed("a", Ok(()));
        coordinator.child_completed("a", Ok(()));
    }

    #[test]
    #[should_panic(expected = "below zero")]
    fn test_extra_ready_panics() {
        let mut coordinator = OperationCoordinator::new("Moment(m1)", 1);
        assert!(coordinator.child_ready("a"));
        coordinator.child_ready("a");
    }

    #[test]
    fn test_readies_count_down() {
        let mut coordinator = OperationCoordinator::new("Story(s1)", 2);
        assert!(!coordinator.child_ready("a"));
        assert_eq!(coordinator.outstanding_child_readies(), 1);
        assert!(coordinator.child_ready("b"));
    }
}
