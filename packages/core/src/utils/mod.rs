//! Utility modules for storykeep-core
//!
//! - [`thread_safe_list`] - mutex-guarded doubly linked list over an arena
//! - [`logging`] - tracing subscriber bootstrap

pub mod logging;
pub mod thread_safe_list;

pub use thread_safe_list::{NodeHandle, ThreadSafeList};

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lock a mutex, recovering the data if a previous holder panicked
///
/// Every writer in this crate validates before it mutates, so a poisoned
/// guard never protects half-updated state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
