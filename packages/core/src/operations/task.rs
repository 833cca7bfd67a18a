//! Cancellable object tasks
//!
//! [`CancelScope`] is a cooperative cancellation token arranged in a tree:
//! cancelling a scope cancels every scope derived from it, including ones
//! derived after the fact. Recursive operations derive one scope per level,
//! so cancelling a story's task reaches the in-flight work on every moment
//! below it.
//!
//! [`ObjectTask`] wraps one recursive operation on one object. It is
//! started once, cancelled any number of times, and reports its result
//! exactly once through [`ObjectTask::finished`].

use crate::behaviors::{ObjectDelegate, ReadySignal};
use crate::models::{LocalType, StorageLocation};
use crate::operations::PersistError;
use crate::services::{Priority, TaskScheduler};
use crate::utils::lock;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

struct ScopeInner {
    cancelled: watch::Sender<bool>,
    children: Mutex<Vec<Weak<ScopeInner>>>,
}

impl ScopeInner {
    fn cancel(self: &Arc<Self>) {
        if self.cancelled.send_replace(true) {
            return;
        }
        let children = std::mem::take(&mut *lock(&self.children));
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cooperative cancellation token
#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<ScopeInner>,
}

impl CancelScope {
    pub fn new() -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            inner: Arc::new(ScopeInner {
                cancelled,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Derive a scope from `parent`, or a root scope when there is none
    pub fn child_of(parent: Option<&CancelScope>) -> Self {
        match parent {
            Some(parent) => parent.child(),
            None => Self::new(),
        }
    }

    /// Derive a scope that is cancelled whenever this one is
    pub fn child(&self) -> Self {
        let child = Self::new();
        {
            let mut children = lock(&self.inner.children);
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        // Registered first, so a concurrent cancel reaches the child either way
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Cancel this scope and everything derived from it; idempotent
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.borrow()
    }

    /// Resolves once the scope is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.inner.cancelled.subscribe();
        // The sender lives as long as `self`
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// `Err(Cancelled)` for `id` if the scope has been cancelled
    pub fn check(&self, id: &str) -> Result<(), PersistError> {
        if self.is_cancelled() {
            Err(PersistError::cancelled(id))
        } else {
            Ok(())
        }
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelScope")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// What an [`ObjectTask`] does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    RetrieveRecursive,
    SaveRecursive,
    DeleteRecursive,
    PrefetchMoment,
    PrefetchNextMedia,
    PrefetchAllMedia,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Finished,
}

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send>>;
type TaskWork = Box<dyn FnOnce(CancelScope) -> TaskFuture + Send>;
type CompletionHook = Box<dyn FnOnce(&Result<(), PersistError>) + Send>;

struct TaskShared {
    id: Uuid,
    kind: OperationKind,
    target: Arc<dyn ObjectDelegate>,
    scope: CancelScope,
    status: Mutex<TaskStatus>,
    cancel_requested: AtomicBool,
}

/// Cloneable control handle for an [`ObjectTask`]
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn kind(&self) -> OperationKind {
        self.shared.kind
    }

    /// Identifier of the object this task operates on
    pub fn target_id(&self) -> String {
        self.shared.target.unique_identifier()
    }

    pub fn status(&self) -> TaskStatus {
        *lock(&self.shared.status)
    }

    pub fn is_finished(&self) -> bool {
        self.status() == TaskStatus::Finished
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.scope.is_cancelled()
    }

    /// Request cancellation
    ///
    /// Idempotent, and a no-op once the task has finished. Besides
    /// cancelling the task's scope this asks the target to abandon in-flight
    /// server traffic for the whole subtree.
    pub fn cancel(&self) {
        if self.is_finished() {
            return;
        }
        if self.shared.cancel_requested.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::debug!(
            "Cancelling {:?} task {} on {}",
            self.shared.kind,
            self.shared.id,
            self.target_id()
        );
        self.shared.scope.cancel();
        match self.shared.kind {
            OperationKind::RetrieveRecursive
            | OperationKind::PrefetchMoment
            | OperationKind::PrefetchNextMedia
            | OperationKind::PrefetchAllMedia => {
                self.shared.target.cancel_retrieve_from_server_recursive()
            }
            OperationKind::SaveRecursive => self.shared.target.cancel_save_to_server_recursive(),
            OperationKind::DeleteRecursive => {}
        }
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("status", &self.status())
            .finish()
    }
}

/// One cancellable operation on one object
///
/// # Examples
///
/// ```rust,no_run
/// use storykeep_core::operations::ObjectTask;
/// use storykeep_core::models::{LocalType, StorageLocation, Story};
/// use storykeep_core::services::StorageContext;
///
/// # async fn example() -> Result<(), storykeep_core::operations::PersistError> {
/// let context = StorageContext::in_memory();
/// let story = Story::new(&context);
///
/// let mut task = ObjectTask::save_recursive(story, StorageLocation::Both, LocalType::Draft);
/// task.start();
/// task.finished().await?;
/// # Ok(())
/// # }
/// ```
pub struct ObjectTask {
    shared: Arc<TaskShared>,
    work: Option<TaskWork>,
    completion_hook: Option<CompletionHook>,
    result_tx: Option<oneshot::Sender<Result<(), PersistError>>>,
    result_rx: oneshot::Receiver<Result<(), PersistError>>,
}

impl ObjectTask {
    /// Task running `work` against `target`
    ///
    /// `work` receives the task's cancel scope and should pass it down as the
    /// parent scope of any recursive call.
    pub fn new<F, Fut>(kind: OperationKind, target: Arc<dyn ObjectDelegate>, work: F) -> Self
    where
        F: FnOnce(CancelScope) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), PersistError>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel();
        Self {
            shared: Arc::new(TaskShared {
                id: Uuid::new_v4(),
                kind,
                target,
                scope: CancelScope::new(),
                status: Mutex::new(TaskStatus::Pending),
                cancel_requested: AtomicBool::new(false),
            }),
            work: Some(Box::new(move |scope| Box::pin(work(scope)) as TaskFuture)),
            completion_hook: None,
            result_tx: Some(result_tx),
            result_rx,
        }
    }

    /// Recursively retrieve `target`; `ready` fires once it is usable
    pub fn retrieve_recursive(
        target: Arc<dyn ObjectDelegate>,
        location: StorageLocation,
        local_type: LocalType,
        force_anyways: bool,
        ready: ReadySignal,
    ) -> Self {
        let object = target.clone();
        Self::new(OperationKind::RetrieveRecursive, target, move |scope| async move {
            object
                .retrieve_recursive(location, local_type, force_anyways, Some(&scope), ready)
                .await
        })
    }

    pub fn save_recursive(
        target: Arc<dyn ObjectDelegate>,
        location: StorageLocation,
        local_type: LocalType,
    ) -> Self {
        let object = target.clone();
        Self::new(OperationKind::SaveRecursive, target, move |scope| async move {
            object.save_recursive(location, local_type, Some(&scope)).await
        })
    }

    pub fn delete_recursive(
        target: Arc<dyn ObjectDelegate>,
        location: StorageLocation,
        local_type: LocalType,
    ) -> Self {
        let object = target.clone();
        Self::new(OperationKind::DeleteRecursive, target, move |scope| async move {
            object.delete_recursive(location, local_type, Some(&scope)).await
        })
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn kind(&self) -> OperationKind {
        self.shared.kind
    }

    /// Run `hook` with the result right before it is reported
    pub fn set_completion_hook<F>(&mut self, hook: F)
    where
        F: FnOnce(&Result<(), PersistError>) + Send + 'static,
    {
        self.completion_hook = Some(Box::new(hook));
    }

    /// Spawn the task on the tokio runtime
    ///
    /// # Panics
    ///
    /// Panics if the task was already started.
    pub fn start(&mut self) {
        let run = self.take_run(None);
        tokio::spawn(run);
    }

    /// Spawn the task behind `scheduler`'s admission control
    ///
    /// A task cancelled while waiting for admission finishes immediately
    /// without taking a slot.
    pub fn start_on(&mut self, scheduler: &TaskScheduler, priority: Priority) {
        let run = self.take_run(Some((scheduler.clone(), priority)));
        tokio::spawn(run);
    }

    pub fn cancel(&self) {
        self.handle().cancel();
    }

    /// Wait for the result; starts the task first if nobody did
    pub async fn finished(mut self) -> Result<(), PersistError> {
        if self.work.is_some() {
            self.start();
        }
        match self.result_rx.await {
            Ok(result) => result,
            Err(_) => Err(PersistError::internal(format!(
                "{:?} task {} ended without reporting a result",
                self.shared.kind, self.shared.id
            ))),
        }
    }

    fn take_run(
        &mut self,
        admission: Option<(TaskScheduler, Priority)>,
    ) -> impl Future<Output = ()> + Send + 'static {
        let (work, result_tx) = match (self.work.take(), self.result_tx.take()) {
            (Some(work), Some(tx)) => (work, tx),
            _ => panic!("ObjectTask {} started twice", self.shared.id),
        };
        let hook = self.completion_hook.take();
        let shared = self.shared.clone();

        async move {
            let target_id = shared.target.unique_identifier();
            let attempt = {
                let shared = shared.clone();
                let target_id = target_id.clone();
                async move {
                    let _permit = match &admission {
                        Some((scheduler, priority)) => tokio::select! {
                            biased;
                            _ = shared.scope.cancelled() => {
                                return Err(PersistError::cancelled(target_id));
                            }
                            permit = scheduler.admit(*priority) => permit,
                        },
                        None => None,
                    };
                    shared.scope.check(&target_id)?;

                    *lock(&shared.status) = TaskStatus::Running;
                    work(shared.scope.clone()).await
                }
            };
            let result = attempt.await;

            *lock(&shared.status) = TaskStatus::Finished;
            match &result {
                Ok(()) => tracing::debug!("{:?} task on {} finished", shared.kind, target_id),
                Err(e) => tracing::debug!("{:?} task on {} failed: {}", shared.kind, target_id, e),
            }

            if let Some(hook) = hook {
                hook(&result);
            }
            let _ = result_tx.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Story;
    use crate::services::StorageContext;
    use std::time::Duration;

    #[test]
    fn test_cancel_cascades_to_children() {
        let root = CancelScope::new();
        let child = root.child();
        let grandchild = child.child();

        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let root = CancelScope::new();
        root.cancel();
        assert!(CancelScope::child_of(Some(&root)).is_cancelled());
        assert!(!CancelScope::child_of(None).is_cancelled());
    }

    #[test]
    fn test_cancel_does_not_reach_parent() {
        let root = CancelScope::new();
        let child = root.child();
        child.cancel();
        child.cancel();
        assert!(!root.is_cancelled());
        assert!(child.check("x").unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let scope = CancelScope::new();
        let waiter = {
            let scope = scope.clone();
            tokio::spawn(async move { scope.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        scope.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_task_reports_once_and_cancel_after_finish_is_noop() {
        let context = StorageContext::in_memory();
        let story = Story::new(&context);

        let mut task = ObjectTask::new(OperationKind::SaveRecursive, story, |_| async { Ok(()) });
        let handle = task.handle();
        task.start();
        task.finished().await.unwrap();

        assert!(handle.is_finished());
        handle.cancel();
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reports_cancelled() {
        let context = StorageContext::in_memory();
        let story = Story::new(&context);

        let task = ObjectTask::new(OperationKind::RetrieveRecursive, story, |_| async {
            Err(PersistError::internal("work must not run after cancel"))
        });
        task.cancel();
        task.cancel();

        let err = task.finished().await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_admission() {
        let context = StorageContext::in_memory();
        let scheduler = TaskScheduler::bounded(1);

        let mut blocker = ObjectTask::new(
            OperationKind::PrefetchNextMedia,
            Story::new(&context),
            |_| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            },
        );
        blocker.start_on(&scheduler, Priority::High);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let mut waiting = ObjectTask::new(
            OperationKind::PrefetchNextMedia,
            Story::new(&context),
            |_| async { Ok(()) },
        );
        waiting.start_on(&scheduler, Priority::Low);
        waiting.cancel();

        let err = tokio::time::timeout(Duration::from_millis(30), waiting.finished())
            .await
            .expect("cancelled task should not wait for the slot")
            .unwrap_err();
        assert!(err.is_cancelled());
        blocker.finished().await.unwrap();
    }

    #[tokio::test]
    async fn test_completion_hook_sees_result() {
        let context = StorageContext::in_memory();
        let seen = Arc::new(Mutex::new(None));

        let mut task = ObjectTask::new(
            OperationKind::DeleteRecursive,
            Story::new(&context),
            |_| async { Err(PersistError::internal("boom")) },
        );
        let sink = seen.clone();
        task.set_completion_hook(move |result| {
            *sink.lock().unwrap() = Some(result.is_err());
        });

        assert!(task.finished().await.is_err());
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }
}
