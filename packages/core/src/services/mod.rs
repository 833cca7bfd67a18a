//! Services
//!
//! Runtime collaborators around the object tree:
//!
//! - [`StorageContext`] - stores, configuration and retry scheduler shared by
//!   every object
//! - [`TaskScheduler`] / [`PriorityGate`] - priority-ordered admission of
//!   async work
//! - [`FetchQueue`] - bounded, cancellable prefetch queue
//! - [`LocationWatcher`] - position fan-out to subscribers

pub mod context;
pub mod fetch_queue;
pub mod location_watch;
pub mod scheduler;

pub use context::StorageContext;
pub use fetch_queue::FetchQueue;
pub use location_watch::{
    Location, LocationCallback, LocationError, LocationWatcher, WatchContext, WatchState,
};
pub use scheduler::{GatePermit, Priority, PriorityGate, TaskScheduler};
