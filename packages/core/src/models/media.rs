//! Media - the photo or video a moment shows

use crate::behaviors::{ObjectCore, ObjectDelegate, StoredObject};
use crate::models::{MediaRecord, MediaType, NodeRecord, ObjectKind};
use crate::operations::PersistError;
use crate::services::StorageContext;
use crate::utils::{read_lock, write_lock};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct MediaFields {
    file_name: String,
    media_type: MediaType,
}

/// Reference to a media file; a leaf of the object tree
pub struct Media {
    core: ObjectCore,
    fields: RwLock<MediaFields>,
}

impl Media {
    /// New media created on this device
    pub fn new(
        context: &Arc<StorageContext>,
        file_name: impl Into<String>,
        media_type: MediaType,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::created(Uuid::new_v4().to_string(), context),
            fields: RwLock::new(MediaFields {
                file_name: file_name.into(),
                media_type,
            }),
        })
    }

    /// Media known only by id, to be retrieved
    pub fn with_id(context: &Arc<StorageContext>, id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::shell(id, context),
            fields: RwLock::new(MediaFields::default()),
        })
    }

    pub fn id(&self) -> &str {
        self.core.id()
    }

    pub fn file_name(&self) -> String {
        read_lock(&self.fields).file_name.clone()
    }

    pub fn media_type(&self) -> MediaType {
        read_lock(&self.fields).media_type
    }

    pub fn set_file_name(&self, file_name: impl Into<String>) {
        write_lock(&self.fields).file_name = file_name.into();
    }
}

impl StoredObject for Media {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Media
    }

    fn to_record(&self) -> NodeRecord {
        let fields = read_lock(&self.fields);
        NodeRecord::Media(MediaRecord {
            id: self.core.id().to_string(),
            file_name: fields.file_name.clone(),
            media_type: fields.media_type,
            updated_at: Utc::now(),
        })
    }

    fn apply_record(&self, record: NodeRecord) -> Result<(), PersistError> {
        match record {
            NodeRecord::Media(record) => {
                let mut fields = write_lock(&self.fields);
                fields.file_name = record.file_name;
                fields.media_type = record.media_type;
                Ok(())
            }
            other => Err(PersistError::kind_mismatch(
                self.core.id(),
                ObjectKind::Media,
                other.kind(),
            )),
        }
    }

    fn child_objects(&self) -> Vec<Arc<dyn ObjectDelegate>> {
        Vec::new()
    }
}
