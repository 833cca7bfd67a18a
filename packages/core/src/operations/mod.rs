//! Object Operations
//!
//! This module holds the machinery behind recursive persistence:
//!
//! - [`coordinator`] - child fan-out, first-error-wins aggregation and the
//!   recursive save / retrieve / delete drivers
//! - [`task`] - cancellable tasks and cancel scopes
//! - [`retry`] - bounded retry of transient remote failures
//! - [`prefetch`] - step-wise story prefetching
//!
//! # Ordering Guarantees
//!
//! - Save and delete touch every child before the parent; a parent whose
//!   child failed is left untouched.
//! - Retrieve loads the parent first (its record names the children).
//! - Each recursive call reports exactly once, after all of its children.

pub mod coordinator;
pub mod error;
pub mod prefetch;
pub mod retry;
pub mod task;

pub use coordinator::{ChildSettlement, OperationCoordinator};
pub use error::PersistError;
pub use prefetch::{prefetch_all, prefetch_next, PrefetchStep};
pub use retry::{with_retry, RetryContext, RetryPolicy};
pub use task::{CancelScope, ObjectTask, OperationKind, TaskFuture, TaskHandle, TaskStatus};
