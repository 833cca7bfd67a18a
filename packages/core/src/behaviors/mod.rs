//! Object Behavior System
//!
//! This module provides the trait-based contract the recursive drivers work
//! against:
//!
//! - [`ObjectDelegate`] - uniform surface of every persistable object
//! - [`ReadySignal`] - one-shot "content is usable" notification
//! - [`StoredObject`] / [`ObjectCore`] - record-backed implementation shared
//!   by all concrete objects
//!
//! New object kinds only implement `StoredObject`; the blanket impl supplies
//! the storage primitives and the recursive operations come from the
//! delegate trait's provided methods.

mod delegate;
mod stored;

pub use delegate::{ObjectDelegate, ReadySignal};
pub(crate) use stored::apply_loaded;
pub use stored::{ObjectCore, StoredObject};
