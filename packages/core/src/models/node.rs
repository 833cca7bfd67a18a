//! Node Records and Storage Enumerations
//!
//! This module defines the persisted shape of every object in a story tree and
//! the enumerations that select where an operation reads or writes.
//!
//! # Architecture
//!
//! - **Closed record set**: `NodeRecord` is a tagged sum of the four object
//!   kinds. Stores only ever see records, never live objects.
//! - **Identifiers, not nesting**: a record references its children by id.
//!   Retrieving a parent yields unretrieved child shells that are filled in
//!   by their own retrieve.
//!
//! # Examples
//!
//! ```rust
//! use storykeep_core::models::{NodeRecord, ObjectKind, StoryRecord};
//!
//! let record = NodeRecord::Story(StoryRecord::new("story-1"));
//! assert_eq!(record.id(), "story-1");
//! assert_eq!(record.kind(), ObjectKind::Story);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Type tag of a node, used for diagnostics and record validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectKind {
    Story,
    Moment,
    Markup,
    Media,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Story => "Story",
            ObjectKind::Moment => "Moment",
            ObjectKind::Markup => "Markup",
            ObjectKind::Media => "Media",
        };
        f.write_str(name)
    }
}

/// Local storage area an object lives in
///
/// The cache holds objects fetched from the server; drafts hold objects the
/// user has not submitted yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LocalType {
    Cache,
    Draft,
}

impl LocalType {
    /// All local areas, in the order `delete_from_local_n_server` clears them
    pub const ALL: [LocalType; 2] = [LocalType::Cache, LocalType::Draft];

    /// Directory / namespace name for this area
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalType::Cache => "cache",
            LocalType::Draft => "draft",
        }
    }
}

impl fmt::Display for LocalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tiers an operation touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageLocation {
    /// Only the given local area
    Local,
    /// The local area first, then the server
    Both,
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLocation::Local => f.write_str("local"),
            StorageLocation::Both => f.write_str("both"),
        }
    }
}

/// Retrieval progress of a single object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RetrieveState {
    /// Only the identifier is known
    #[default]
    NotAvailable,
    /// A retrieve is in flight
    Retrieving,
    /// The record has been applied to the object
    ObjectSynced,
}

/// Kind of media a `Media` object references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaType {
    #[default]
    Photo,
    Video,
}

/// Persisted form of a story
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRecord {
    pub id: String,
    pub title: Option<String>,
    pub venue_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub moment_ids: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl StoryRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            venue_name: None,
            tags: Vec::new(),
            moment_ids: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Persisted form of a moment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentRecord {
    pub id: String,
    pub media_id: Option<String>,
    #[serde(default)]
    pub markup_ids: Vec<String>,
    pub aspect_ratio: f64,
    pub width: u32,
    pub updated_at: DateTime<Utc>,
}

impl MomentRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            media_id: None,
            markup_ids: Vec::new(),
            aspect_ratio: 1.0,
            width: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Persisted form of a markup overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkupRecord {
    pub id: String,
    pub keyword: Option<String>,
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Persisted form of a media reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub id: String,
    pub file_name: String,
    pub media_type: MediaType,
    pub updated_at: DateTime<Utc>,
}

/// Any persisted object
///
/// Serialized with an internal `kind` tag, so a stored record reads back as
/// the variant it was written as:
///
/// ```json
/// {"kind":"moment","id":"...","mediaId":"...","markupIds":[],"aspectRatio":1.0,"width":0,"updatedAt":"..."}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NodeRecord {
    Story(StoryRecord),
    Moment(MomentRecord),
    Markup(MarkupRecord),
    Media(MediaRecord),
}

impl NodeRecord {
    /// Identifier of the object this record belongs to
    pub fn id(&self) -> &str {
        match self {
            NodeRecord::Story(r) => &r.id,
            NodeRecord::Moment(r) => &r.id,
            NodeRecord::Markup(r) => &r.id,
            NodeRecord::Media(r) => &r.id,
        }
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            NodeRecord::Story(_) => ObjectKind::Story,
            NodeRecord::Moment(_) => ObjectKind::Moment,
            NodeRecord::Markup(_) => ObjectKind::Markup,
            NodeRecord::Media(_) => ObjectKind::Media,
        }
    }

    /// Identifiers of the children this record references, in order
    pub fn child_ids(&self) -> Vec<String> {
        match self {
            NodeRecord::Story(r) => r.moment_ids.clone(),
            NodeRecord::Moment(r) => r
                .media_id
                .iter()
                .cloned()
                .chain(r.markup_ids.iter().cloned())
                .collect(),
            NodeRecord::Markup(_) | NodeRecord::Media(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Contract test: stores depend on the internally-tagged, camelCase format
    #[test]
    fn test_record_serialization_contract() {
        let mut record = MomentRecord::new("moment-1");
        record.media_id = Some("media-1".to_string());
        record.markup_ids = vec!["markup-1".to_string()];

        let value = serde_json::to_value(NodeRecord::Moment(record)).unwrap();
        assert_eq!(value["kind"], "moment");
        assert_eq!(value["id"], "moment-1");
        assert_eq!(value["mediaId"], "media-1");
        assert_eq!(value["markupIds"], json!(["markup-1"]));
    }

    #[test]
    fn test_record_deserialization_defaults() {
        let value = json!({
            "kind": "story",
            "id": "story-1",
            "title": "Lunch",
            "venueName": null,
            "updatedAt": "2024-03-01T12:00:00Z"
        });

        let record: NodeRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.kind(), ObjectKind::Story);
        assert!(record.child_ids().is_empty());
    }

    #[test]
    fn test_moment_child_ids_put_media_first() {
        let mut record = MomentRecord::new("m");
        record.media_id = Some("media".to_string());
        record.markup_ids = vec!["a".to_string(), "b".to_string()];

        assert_eq!(
            NodeRecord::Moment(record).child_ids(),
            vec!["media", "a", "b"]
        );
    }

    #[test]
    fn test_kind_display_is_type_tag() {
        assert_eq!(ObjectKind::Story.to_string(), "Story");
        assert_eq!(ObjectKind::Media.to_string(), "Media");
        assert_eq!(LocalType::Draft.to_string(), "draft");
    }
}
