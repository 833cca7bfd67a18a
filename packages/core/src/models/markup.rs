//! Markup - an overlay drawn on top of a moment

use crate::behaviors::{ObjectCore, ObjectDelegate, StoredObject};
use crate::models::{MarkupRecord, NodeRecord, ObjectKind};
use crate::operations::PersistError;
use crate::services::StorageContext;
use crate::utils::{read_lock, write_lock};
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MarkupFields {
    keyword: Option<String>,
    data: Value,
}

/// Text or sticker overlay; a leaf of the object tree
///
/// `data` is opaque to persistence: whatever the editor stores round-trips
/// unchanged.
pub struct Markup {
    core: ObjectCore,
    fields: RwLock<MarkupFields>,
}

impl Markup {
    pub fn new(context: &Arc<StorageContext>, keyword: Option<String>, data: Value) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::created(Uuid::new_v4().to_string(), context),
            fields: RwLock::new(MarkupFields { keyword, data }),
        })
    }

    pub fn with_id(context: &Arc<StorageContext>, id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::shell(id, context),
            fields: RwLock::new(MarkupFields::default()),
        })
    }

    pub fn id(&self) -> &str {
        self.core.id()
    }

    pub fn keyword(&self) -> Option<String> {
        read_lock(&self.fields).keyword.clone()
    }

    pub fn data(&self) -> Value {
        read_lock(&self.fields).data.clone()
    }

    pub fn set_data(&self, data: Value) {
        write_lock(&self.fields).data = data;
    }
}

impl StoredObject for Markup {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Markup
    }

    fn to_record(&self) -> NodeRecord {
        let fields = read_lock(&self.fields);
        NodeRecord::Markup(MarkupRecord {
            id: self.core.id().to_string(),
            keyword: fields.keyword.clone(),
            data: fields.data.clone(),
            updated_at: Utc::now(),
        })
    }

    fn apply_record(&self, record: NodeRecord) -> Result<(), PersistError> {
        match record {
            NodeRecord::Markup(record) => {
                let mut fields = write_lock(&self.fields);
                fields.keyword = record.keyword;
                fields.data = record.data;
                Ok(())
            }
            other => Err(PersistError::kind_mismatch(
                self.core.id(),
                ObjectKind::Markup,
                other.kind(),
            )),
        }
    }

    fn child_objects(&self) -> Vec<Arc<dyn ObjectDelegate>> {
        Vec::new()
    }
}
