//! Task scheduling with priorities
//!
//! Deferred work (retry attempts, prefetch operations) is handed to a
//! [`TaskScheduler`]. An unbounded scheduler simply spawns onto the tokio
//! runtime; a bounded one admits at most `n` jobs at a time through a
//! [`PriorityGate`], letting waiting `High` jobs in before `Low` before
//! `Background`, first-come first-served within a priority.

use crate::utils::lock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Scheduling priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Low,
    Background,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Low, Priority::Background];

    fn rank(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Low => 1,
            Priority::Background => 2,
        }
    }
}

struct GateState {
    available: usize,
    waiters: [VecDeque<oneshot::Sender<()>>; 3],
}

/// Counting gate that hands free slots to the highest-priority waiter
pub struct PriorityGate {
    capacity: usize,
    state: Mutex<GateState>,
}

/// Admission to a [`PriorityGate`]; the slot is released on drop
pub struct GatePermit {
    gate: Arc<PriorityGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Pending admission; returns a slot that was handed over after the waiter
/// stopped listening
struct Waiter {
    gate: Arc<PriorityGate>,
    rx: Option<oneshot::Receiver<()>>,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.gate.release();
            }
        }
    }
}

impl PriorityGate {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            state: Mutex::new(GateState {
                available: capacity,
                waiters: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots right now
    pub fn available(&self) -> usize {
        lock(&self.state).available
    }

    /// Wait for a slot
    pub async fn acquire(self: &Arc<Self>, priority: Priority) -> GatePermit {
        let mut waiter = {
            let mut state = lock(&self.state);
            if state.available > 0 {
                state.available -= 1;
                return GatePermit { gate: self.clone() };
            }
            let (tx, rx) = oneshot::channel();
            state.waiters[priority.rank()].push_back(tx);
            Waiter {
                gate: self.clone(),
                rx: Some(rx),
            }
        };

        if let Some(rx) = waiter.rx.as_mut() {
            // The sender lives in our own state, so it only drops on handoff
            let _ = rx.await;
        }
        waiter.rx = None;
        GatePermit { gate: self.clone() }
    }

    fn release(&self) {
        let mut state = lock(&self.state);
        loop {
            let next = state.waiters.iter_mut().find_map(|queue| queue.pop_front());
            match next {
                // A closed receiver means that waiter gave up; try the next one
                Some(tx) => {
                    if tx.send(()).is_ok() {
                        return;
                    }
                }
                None => {
                    state.available += 1;
                    return;
                }
            }
        }
    }
}

/// Spawns deferred work, optionally bounded by a [`PriorityGate`]
#[derive(Clone, Default)]
pub struct TaskScheduler {
    gate: Option<Arc<PriorityGate>>,
}

impl TaskScheduler {
    /// Scheduler with no concurrency limit
    pub fn unbounded() -> Self {
        Self { gate: None }
    }

    /// Scheduler that runs at most `concurrency` jobs at once
    ///
    /// # Panics
    ///
    /// Panics if `concurrency` is zero; nothing could ever run.
    pub fn bounded(concurrency: usize) -> Self {
        assert!(concurrency > 0, "TaskScheduler concurrency must be at least 1");
        Self {
            gate: Some(PriorityGate::new(concurrency)),
        }
    }

    pub fn concurrency_limit(&self) -> Option<usize> {
        self.gate.as_ref().map(|g| g.capacity())
    }

    /// Wait until a job of `priority` may run
    ///
    /// Returns `None` for an unbounded scheduler.
    pub async fn admit(&self, priority: Priority) -> Option<GatePermit> {
        match &self.gate {
            Some(gate) => Some(gate.acquire(priority).await),
            None => {
                if priority == Priority::Background {
                    tokio::task::yield_now().await;
                }
                None
            }
        }
    }

    /// Run `job` once admitted
    pub fn schedule<F>(&self, priority: Priority, job: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.schedule_after(Duration::ZERO, priority, job)
    }

    /// Run `job` after `delay`, then once admitted
    ///
    /// The delay elapses before admission, so a sleeping job never holds a
    /// slot.
    pub fn schedule_after<F>(&self, delay: Duration, priority: Priority, job: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _permit = scheduler.admit(priority).await;
            job.await
        })
    }
}
