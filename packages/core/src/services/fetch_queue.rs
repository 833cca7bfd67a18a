//! Fetch queue
//!
//! Bounded, prioritised queue for prefetch work. At most
//! `prefetch_concurrency` tasks run at once; queued tasks are admitted
//! high priority first. Outstanding tasks are tracked per priority so a
//! screen can cancel prefetches for objects that scrolled away while keeping
//! the one the user is looking at.
//!
//! Each object is expected to have at most one task per priority.

use crate::operations::{ObjectTask, TaskHandle};
use crate::services::{Priority, TaskScheduler};
use crate::utils::lock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct QueueState {
    scheduler: TaskScheduler,
    operations: Mutex<HashMap<Priority, Vec<TaskHandle>>>,
}

impl QueueState {
    /// Take every task at `priority`, split into those for `object_id` and
    /// the rest
    fn split(&self, priority: Priority, object_id: &str) -> (Vec<TaskHandle>, Vec<TaskHandle>) {
        let mut operations = lock(&self.operations);
        let tasks = operations.remove(&priority).unwrap_or_default();
        tasks
            .into_iter()
            .partition(|task| task.target_id() == object_id)
    }
}

/// Bounded queue of prefetch tasks
#[derive(Clone)]
pub struct FetchQueue {
    state: Arc<QueueState>,
}

impl FetchQueue {
    pub fn new(concurrency: usize) -> Self {
        Self {
            state: Arc::new(QueueState {
                scheduler: TaskScheduler::bounded(concurrency),
                operations: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn concurrency_limit(&self) -> usize {
        self.state.scheduler.concurrency_limit().unwrap_or(usize::MAX)
    }

    /// Start `task` behind the queue's admission control
    ///
    /// The task stays listed under `priority` until it finishes or is
    /// cancelled through the queue. The caller keeps `task` to await its
    /// result.
    pub fn queue(&self, task: &mut ObjectTask, priority: Priority) -> TaskHandle {
        let handle = task.handle();
        let outstanding = {
            let mut operations = lock(&self.state.operations);
            let tasks = operations.entry(priority).or_default();
            tasks.push(handle.clone());
            tasks.len()
        };
        tracing::debug!(
            "Added {:?} task for {} at {:?} priority, {} outstanding",
            handle.kind(),
            handle.target_id(),
            priority,
            outstanding
        );

        let state = Arc::downgrade(&self.state);
        let task_id = handle.id();
        task.set_completion_hook(move |_| {
            let Some(state) = state.upgrade() else {
                return;
            };
            let mut operations = lock(&state.operations);
            if let Some(tasks) = operations.get_mut(&priority) {
                tasks.retain(|t| t.id() != task_id);
                tracing::debug!(
                    "Task {} completed at {:?} priority, {} outstanding",
                    task_id,
                    priority,
                    tasks.len()
                );
            }
        });
        task.start_on(&self.state.scheduler, priority);
        handle
    }

    /// Cancel the tasks for `object_id` at `priority`
    pub fn cancel(&self, object_id: &str, priority: Priority) {
        let (matching, rest) = self.state.split(priority, object_id);
        self.restore(priority, rest);

        if matching.len() > 1 {
            tracing::warn!(
                "Expected at most one task for {} at {:?} priority, found {}",
                object_id,
                priority,
                matching.len()
            );
        }
        for task in matching {
            task.cancel();
        }
    }

    /// Cancel every task at `priority` except those for `object_id`
    pub fn cancel_all_but(&self, object_id: &str, priority: Priority) {
        let (keep, cancel) = self.state.split(priority, object_id);
        self.restore(priority, keep);

        tracing::debug!(
            "Cancelling {} tasks at {:?} priority, keeping {}",
            cancel.len(),
            priority,
            object_id
        );
        for task in cancel {
            task.cancel();
        }
    }

    /// Cancel every task at `priority`
    pub fn cancel_all(&self, priority: Priority) {
        let tasks = lock(&self.state.operations)
            .remove(&priority)
            .unwrap_or_default();
        tracing::debug!("Cancelling all {} tasks at {:?} priority", tasks.len(), priority);
        for task in tasks {
            task.cancel();
        }
    }

    /// Number of listed tasks at `priority`
    pub fn outstanding(&self, priority: Priority) -> usize {
        lock(&self.state.operations)
            .get(&priority)
            .map(|tasks| tasks.len())
            .unwrap_or(0)
    }

    fn restore(&self, priority: Priority, tasks: Vec<TaskHandle>) {
        if tasks.is_empty() {
            return;
        }
        lock(&self.state.operations)
            .entry(priority)
            .or_default()
            .extend(tasks);
    }
}
