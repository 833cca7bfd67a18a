//! Story - the root of the object tree
//!
//! A story is an ordered list of moments plus a little metadata (title,
//! venue, tags). Its record stores only moment ids; the moments themselves
//! are separate records retrieved through the recursive drivers.

use crate::behaviors::{ObjectCore, ObjectDelegate, StoredObject};
use crate::models::{Moment, NodeRecord, ObjectKind, StoryRecord};
use crate::operations::PersistError;
use crate::services::StorageContext;
use crate::utils::{read_lock, write_lock};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct StoryFields {
    title: Option<String>,
    venue_name: Option<String>,
    tags: Vec<String>,
    moments: Vec<Arc<Moment>>,
}

pub struct Story {
    core: ObjectCore,
    fields: RwLock<StoryFields>,
}

impl Story {
    /// New, empty story created on this device
    pub fn new(context: &Arc<StorageContext>) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::created(Uuid::new_v4().to_string(), context),
            fields: RwLock::new(StoryFields::default()),
        })
    }

    /// Story known only by id, to be retrieved
    pub fn with_id(context: &Arc<StorageContext>, id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::shell(id, context),
            fields: RwLock::new(StoryFields::default()),
        })
    }

    pub fn id(&self) -> &str {
        self.core.id()
    }

    pub fn title(&self) -> Option<String> {
        read_lock(&self.fields).title.clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        write_lock(&self.fields).title = Some(title.into());
    }

    pub fn venue_name(&self) -> Option<String> {
        read_lock(&self.fields).venue_name.clone()
    }

    pub fn set_venue_name(&self, venue_name: impl Into<String>) {
        write_lock(&self.fields).venue_name = Some(venue_name.into());
    }

    pub fn tags(&self) -> Vec<String> {
        read_lock(&self.fields).tags.clone()
    }

    pub fn set_tags(&self, tags: Vec<String>) {
        write_lock(&self.fields).tags = tags;
    }

    pub fn moments(&self) -> Vec<Arc<Moment>> {
        read_lock(&self.fields).moments.clone()
    }

    pub fn add_moment(&self, moment: Arc<Moment>) {
        write_lock(&self.fields).moments.push(moment);
    }

    /// Detach a moment; the caller is responsible for deleting its records
    pub fn remove_moment(&self, moment_id: &str) -> Option<Arc<Moment>> {
        let mut fields = write_lock(&self.fields);
        let index = fields.moments.iter().position(|m| m.id() == moment_id)?;
        Some(fields.moments.remove(index))
    }
}

impl StoredObject for Story {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Story
    }

    fn to_record(&self) -> NodeRecord {
        let fields = read_lock(&self.fields);
        NodeRecord::Story(StoryRecord {
            id: self.core.id().to_string(),
            title: fields.title.clone(),
            venue_name: fields.venue_name.clone(),
            tags: fields.tags.clone(),
            moment_ids: fields.moments.iter().map(|m| m.id().to_string()).collect(),
            updated_at: Utc::now(),
        })
    }

    fn apply_record(&self, record: NodeRecord) -> Result<(), PersistError> {
        let record = match record {
            NodeRecord::Story(record) => record,
            other => {
                return Err(PersistError::kind_mismatch(
                    self.core.id(),
                    ObjectKind::Story,
                    other.kind(),
                ))
            }
        };

        let context = self.core.context();
        let mut fields = write_lock(&self.fields);
        fields.title = record.title;
        fields.venue_name = record.venue_name;
        fields.tags = record.tags;
        fields.moments = record
            .moment_ids
            .into_iter()
            .map(|id| {
                fields
                    .moments
                    .iter()
                    .find(|m| m.id() == id)
                    .cloned()
                    .unwrap_or_else(|| Moment::with_id(context, id))
            })
            .collect();
        Ok(())
    }

    fn child_objects(&self) -> Vec<Arc<dyn ObjectDelegate>> {
        read_lock(&self.fields)
            .moments
            .iter()
            .map(|m| m.clone() as Arc<dyn ObjectDelegate>)
            .collect()
    }
}
