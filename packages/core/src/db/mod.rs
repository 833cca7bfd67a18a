//! Storage Layer
//!
//! This module holds the two persistence tiers the orchestration layer talks
//! to:
//!
//! - [`LocalStore`] - on-device areas (cache and drafts), with an in-memory
//!   and a file-backed implementation
//! - [`RemoteStore`] - the server tier, with an in-memory stand-in
//!
//! Both are collaborators: nothing here knows about object trees, only about
//! individual records.

mod error;
mod file_store;
mod local_store;
mod remote_store;

pub use error::StoreError;
pub use file_store::FileLocalStore;
pub use local_store::{LocalStore, MemoryLocalStore};
pub use remote_store::{MemoryRemoteStore, RemoteStore};
