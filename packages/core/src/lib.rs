//! Storykeep Core Persistence Layer
//!
//! This crate moves a tree of story objects between an on-device store and a
//! remote store, recursively and concurrently, and keeps long-running fetches
//! cancellable.
//!
//! # Architecture
//!
//! - **Object tree**: `Story` → `Moment` → (`Media`, `Markup`), each node a
//!   shared, interior-mutable object
//! - **Uniform delegate**: every node implements `ObjectDelegate`; recursive
//!   save / retrieve / delete are generic over it
//! - **Per-call coordination**: each recursive call owns its child counters,
//!   so concurrent calls on one object never share state
//! - **Retry and cancel**: remote calls retry transient failures a bounded
//!   number of times; cancel scopes cascade from a task into its children
//!
//! # Modules
//!
//! - [`models`] - Story, Moment, Media, Markup and their records
//! - [`behaviors`] - delegate contract and record-backed implementation
//! - [`operations`] - coordinator, tasks, retry and prefetch
//! - [`services`] - storage context, schedulers, fetch queue, location watcher
//! - [`db`] - local and remote stores
//! - [`utils`] - thread-safe list and logging bootstrap

pub mod behaviors;
pub mod config;
pub mod db;
pub mod models;
pub mod operations;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use behaviors::*;
pub use config::PersistenceConfig;
pub use models::*;
pub use operations::{CancelScope, ObjectTask, PersistError};
pub use services::*;
