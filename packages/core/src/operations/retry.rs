//! Bounded retry
//!
//! [`RetryContext`] is the low-level primitive: `start` runs a unit of work
//! once, and each later `attempt` either schedules another run after a delay
//! or reports that the budget is spent. A context started with a count of
//! `N` runs the work at most `N` times in total, so the `N`-th call to
//! `attempt` is the first to return `false`.
//!
//! [`with_retry`] wraps the primitive for async operations: transient errors
//! are retried on the storage context's scheduler, anything else (or the last
//! transient error) is returned to the caller.
//!
//! # Examples
//!
//! ```rust,no_run
//! use storykeep_core::operations::{with_retry, RetryPolicy};
//! use storykeep_core::services::TaskScheduler;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), storykeep_core::operations::PersistError> {
//! let scheduler = TaskScheduler::unbounded();
//! let policy = RetryPolicy::new(3, Duration::from_millis(200));
//! let value = with_retry(&scheduler, "fetch config", policy, || async { Ok(42) }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use crate::config::PersistenceConfig;
use crate::operations::PersistError;
use crate::services::{Priority, TaskScheduler};
use crate::utils::lock;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

type RetryWork = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct RetryState {
    name: String,
    max_count: u32,
    invocations: u32,
    started: bool,
    done: bool,
    work: Option<RetryWork>,
}

/// Retry bookkeeping for one unit of work
pub struct RetryContext {
    scheduler: TaskScheduler,
    state: Mutex<RetryState>,
}

impl RetryContext {
    pub fn new(scheduler: TaskScheduler) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            state: Mutex::new(RetryState::default()),
        })
    }

    /// Record the budget and run `work` for the first time, synchronously
    ///
    /// # Panics
    ///
    /// Panics if the context was already started or `max_count` is zero.
    pub fn start<F>(&self, name: impl Into<String>, max_count: u32, work: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let work: RetryWork = Arc::new(work);
        {
            let mut state = lock(&self.state);
            if state.started {
                panic!("RetryContext '{}' started twice", state.name);
            }
            assert!(max_count > 0, "RetryContext needs at least one attempt");

            state.name = name.into();
            state.max_count = max_count;
            state.invocations = 1;
            state.started = true;
            state.work = Some(work.clone());
        }
        work();
    }

    /// Schedule another run of the work after `delay`
    ///
    /// Returns `false` once every attempt has been used; the work closure is
    /// released at that point.
    ///
    /// # Panics
    ///
    /// Panics if called before `start` or after `done`.
    pub fn attempt(&self, delay: Duration, priority: Priority) -> bool {
        let work = {
            let mut state = lock(&self.state);
            if !state.started {
                panic!("RetryContext::attempt called before start");
            }
            if state.done {
                panic!("RetryContext::attempt called on '{}' after done", state.name);
            }
            if state.invocations >= state.max_count {
                tracing::debug!(
                    "Retry budget for '{}' exhausted after {} attempts",
                    state.name,
                    state.invocations
                );
                state.work = None;
                return false;
            }

            state.invocations += 1;
            tracing::debug!(
                "Retrying '{}' ({}/{}) in {:?}",
                state.name,
                state.invocations,
                state.max_count,
                delay
            );
            match state.work.clone() {
                Some(work) => work,
                None => unreachable!("retry work released while attempts remain"),
            }
        };

        self.scheduler
            .schedule_after(delay, priority, async move { work() });
        true
    }

    /// Mark the work finished; later `attempt` calls are bugs
    pub fn done(&self) {
        let mut state = lock(&self.state);
        state.done = true;
        state.work = None;
    }

    /// Number of times the work has been (or is scheduled to be) run
    pub fn invocations(&self) -> u32 {
        lock(&self.state).invocations
    }

    pub fn is_done(&self) -> bool {
        lock(&self.state).done
    }
}

/// How many times, and how far apart, to retry a remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Run exactly once
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::new(config.remote_retry_attempts, config.retry_delay())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PersistenceConfig::default())
    }
}

/// Run `op`, retrying transient failures under `policy`
pub async fn with_retry<T, F, Fut>(
    scheduler: &TaskScheduler,
    name: impl Into<String>,
    policy: RetryPolicy,
    op: F,
) -> Result<T, PersistError>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, PersistError>> + Send + 'static,
{
    let name = name.into();
    let context = RetryContext::new(scheduler.clone());
    let (tx, rx) = oneshot::channel();
    let reply = Arc::new(Mutex::new(Some(tx)));
    let weak = Arc::downgrade(&context);
    let label = name.clone();

    context.start(name.clone(), policy.max_attempts.max(1), move || {
        let attempt = op();
        let weak = weak.clone();
        let reply = reply.clone();
        let label = label.clone();
        tokio::spawn(async move {
            let result = attempt.await;
            // The caller stopped waiting
            let Some(context) = weak.upgrade() else {
                return;
            };

            if let Err(e) = &result {
                if e.is_transient() {
                    if context.attempt(policy.delay, Priority::Background) {
                        tracing::debug!("'{}' failed transiently: {}", label, e);
                        return;
                    }
                    tracing::warn!(
                        "'{}' still failing after {} attempts: {}",
                        label,
                        context.invocations(),
                        e
                    );
                }
            }

            context.done();
            if let Some(tx) = lock(&reply).take() {
                let _ = tx.send(result);
            }
        });
    });

    let outcome = rx.await;
    drop(context);
    outcome.unwrap_or_else(|_| {
        Err(PersistError::internal(format!(
            "retry of '{}' ended without a result",
            name
        )))
    })
}
