//! Data Models
//!
//! This module contains the object tree the persistence layer moves around:
//!
//! - [`Story`] - root; an ordered list of moments
//! - [`Moment`] - one media item plus its markups
//! - [`Markup`], [`Media`] - leaves
//!
//! and the plain records they persist as (`node`). The live objects are
//! shared (`Arc`) and interior-mutable so one tree can be read by the UI
//! while a recursive save or retrieve walks it.

mod markup;
mod media;
mod moment;
mod node;
mod story;

pub use markup::Markup;
pub use media::Media;
pub use moment::Moment;
pub use node::{
    LocalType, MarkupRecord, MediaRecord, MediaType, MomentRecord, NodeRecord, ObjectKind,
    RetrieveState, StorageLocation, StoryRecord,
};
pub use story::Story;
