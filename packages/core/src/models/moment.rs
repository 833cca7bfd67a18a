//! Moment - one page of a story: a media item plus its markups

use crate::behaviors::{apply_loaded, ObjectCore, ObjectDelegate, StoredObject};
use crate::db::StoreError;
use crate::models::{LocalType, Markup, Media, MomentRecord, NodeRecord, ObjectKind};
use crate::operations::{with_retry, PersistError};
use crate::services::StorageContext;
use crate::utils::{read_lock, write_lock};
use chrono::Utc;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct MomentFields {
    media: Option<Arc<Media>>,
    markups: Vec<Arc<Markup>>,
    aspect_ratio: f64,
    width: u32,
}

pub struct Moment {
    core: ObjectCore,
    fields: RwLock<MomentFields>,
}

impl Moment {
    pub fn new(context: &Arc<StorageContext>) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::created(Uuid::new_v4().to_string(), context),
            fields: RwLock::new(MomentFields {
                aspect_ratio: 1.0,
                ..MomentFields::default()
            }),
        })
    }

    pub fn with_id(context: &Arc<StorageContext>, id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            core: ObjectCore::shell(id, context),
            fields: RwLock::new(MomentFields::default()),
        })
    }

    pub fn id(&self) -> &str {
        self.core.id()
    }

    pub fn media(&self) -> Option<Arc<Media>> {
        read_lock(&self.fields).media.clone()
    }

    pub fn set_media(&self, media: Arc<Media>) {
        write_lock(&self.fields).media = Some(media);
    }

    pub fn markups(&self) -> Vec<Arc<Markup>> {
        read_lock(&self.fields).markups.clone()
    }

    pub fn add_markup(&self, markup: Arc<Markup>) {
        write_lock(&self.fields).markups.push(markup);
    }

    pub fn aspect_ratio(&self) -> f64 {
        read_lock(&self.fields).aspect_ratio
    }

    pub fn width(&self) -> u32 {
        read_lock(&self.fields).width
    }

    pub fn set_dimensions(&self, aspect_ratio: f64, width: u32) {
        let mut fields = write_lock(&self.fields);
        fields.aspect_ratio = aspect_ratio;
        fields.width = width;
    }

    /// Whether the moment can be shown: its record and its media are loaded
    pub fn is_ready(&self) -> bool {
        if !self.core.is_retrieved() {
            return false;
        }
        match self.media() {
            Some(media) => media.is_retrieved(),
            None => true,
        }
    }

    /// Whether a batch request has anything to bring in for this moment:
    /// its own record, or the record of any of its markups
    fn needs_batch(&self) -> bool {
        !self.core.is_retrieved() || self.markups().iter().any(|m| !m.is_retrieved())
    }

    /// Load every incomplete moment, and its markups, in batched server
    /// requests
    ///
    /// Returns `None` when there was nothing to fetch, otherwise the number
    /// of moments the batch brought in. Fetched records are cached into
    /// `local_type`.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` naming the first requested record the server
    /// did not return.
    pub async fn batch_retrieve(
        moments: &[Arc<Moment>],
        local_type: LocalType,
    ) -> Option<Result<usize, PersistError>> {
        let pending: Vec<&Arc<Moment>> = moments.iter().filter(|m| m.needs_batch()).collect();
        let first = pending.first()?;
        Some(Self::fetch_batch(first.core.context().clone(), &pending, local_type).await)
    }

    async fn fetch_batch(
        context: Arc<StorageContext>,
        pending: &[&Arc<Moment>],
        local_type: LocalType,
    ) -> Result<usize, PersistError> {
        let ids: Vec<String> = pending.iter().map(|m| m.id().to_string()).collect();
        tracing::debug!("Batch retrieving {} moments", ids.len());

        let mut applied = 0;
        for record in fetch_records(&context, "moments", &ids).await? {
            let Some(moment) = pending.iter().find(|m| m.id() == record.id()) else {
                tracing::warn!("Batch returned unrequested record {}", record.id());
                continue;
            };
            apply_loaded::<Moment>(moment, record.clone())?;
            context.local().put(local_type, record).await?;
            applied += 1;
        }
        if let Some(missing) = pending.iter().find(|m| !m.core.is_retrieved()) {
            tracing::warn!("Batch found {} of {} moments", applied, ids.len());
            return Err(StoreError::not_found(missing.id()).into());
        }

        // Markups come along with their moments
        let markups: Vec<Arc<Markup>> = pending
            .iter()
            .flat_map(|m| m.markups())
            .filter(|m| !m.is_retrieved())
            .collect();
        if !markups.is_empty() {
            let markup_ids: Vec<String> = markups.iter().map(|m| m.id().to_string()).collect();
            for record in fetch_records(&context, "markups", &markup_ids).await? {
                let Some(markup) = markups.iter().find(|m| m.id() == record.id()) else {
                    tracing::warn!("Batch returned unrequested record {}", record.id());
                    continue;
                };
                apply_loaded::<Markup>(markup, record.clone())?;
                context.local().put(local_type, record).await?;
            }
            if let Some(missing) = markups.iter().find(|m| !m.is_retrieved()) {
                return Err(StoreError::not_found(missing.id()).into());
            }
        }

        Ok(applied)
    }
}

/// One batched server fetch, with retry
async fn fetch_records(
    context: &StorageContext,
    what: &str,
    ids: &[String],
) -> Result<Vec<NodeRecord>, PersistError> {
    let remote = context.remote().clone();
    let request = ids.to_vec();
    with_retry(
        context.retry_scheduler(),
        format!("batch fetch of {} {}", ids.len(), what),
        context.retry_policy(),
        move || {
            let remote = remote.clone();
            let ids = request.clone();
            async move { remote.fetch_batch(&ids).await.map_err(PersistError::from) }
        },
    )
    .await
}

impl StoredObject for Moment {
    fn core(&self) -> &ObjectCore {
        &self.core
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Moment
    }

    fn to_record(&self) -> NodeRecord {
        let fields = read_lock(&self.fields);
        NodeRecord::Moment(MomentRecord {
            id: self.core.id().to_string(),
            media_id: fields.media.as_ref().map(|m| m.id().to_string()),
            markup_ids: fields.markups.iter().map(|m| m.id().to_string()).collect(),
            aspect_ratio: fields.aspect_ratio,
            width: fields.width,
            updated_at: Utc::now(),
        })
    }

    fn apply_record(&self, record: NodeRecord) -> Result<(), PersistError> {
        let record = match record {
            NodeRecord::Moment(record) => record,
            other => {
                return Err(PersistError::kind_mismatch(
                    self.core.id(),
                    ObjectKind::Moment,
                    other.kind(),
                ))
            }
        };

        let context = self.core.context();
        let mut fields = write_lock(&self.fields);

        // Keep already-known children so loaded content is not thrown away
        fields.media = record.media_id.map(|id| match &fields.media {
            Some(existing) if existing.id() == id => existing.clone(),
            _ => Media::with_id(context, id),
        });
        fields.markups = record
            .markup_ids
            .into_iter()
            .map(|id| {
                fields
                    .markups
                    .iter()
                    .find(|m| m.id() == id)
                    .cloned()
                    .unwrap_or_else(|| Markup::with_id(context, id))
            })
            .collect();
        fields.aspect_ratio = record.aspect_ratio;
        fields.width = record.width;
        Ok(())
    }

    fn child_objects(&self) -> Vec<Arc<dyn ObjectDelegate>> {
        let fields = read_lock(&self.fields);
        let media = fields
            .media
            .iter()
            .map(|m| m.clone() as Arc<dyn ObjectDelegate>);
        let markups = fields
            .markups
            .iter()
            .map(|m| m.clone() as Arc<dyn ObjectDelegate>);
        media.chain(markups).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaType, StorageLocation};
    use serde_json::json;

    #[tokio::test]
    async fn test_children_are_media_then_markups() {
        let context = StorageContext::in_memory();
        let moment = Moment::new(&context);
        let markup = Markup::new(&context, Some("ramen".to_string()), json!({"x": 1}));
        let media = Media::new(&context, "bowl.jpg", MediaType::Photo);
        moment.add_markup(markup.clone());
        moment.set_media(media.clone());

        let ids: Vec<String> = moment
            .children()
            .iter()
            .map(|c| c.unique_identifier())
            .collect();
        assert_eq!(ids, vec![media.id().to_string(), markup.id().to_string()]);
    }

    #[tokio::test]
    async fn test_round_trip_through_local_store() -> anyhow::Result<()> {
        let context = StorageContext::in_memory();
        let moment = Moment::new(&context);
        moment.set_media(Media::new(&context, "clip.mov", MediaType::Video));
        moment.set_dimensions(0.5625, 1080);
        moment
            .save_recursive(StorageLocation::Local, LocalType::Draft, None)
            .await?;

        let loaded = Moment::with_id(&context, moment.id());
        assert!(!loaded.is_ready());
        loaded
            .retrieve_recursive(
                StorageLocation::Local,
                LocalType::Draft,
                false,
                None,
                Default::default(),
            )
            .await?;

        assert!(loaded.is_ready());
        assert_eq!(loaded.width(), 1080);
        assert_eq!(
            loaded.media().map(|m| m.file_name()),
            Some("clip.mov".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_keeps_known_children() {
        let context = StorageContext::in_memory();
        let moment = Moment::new(&context);
        let media = Media::new(&context, "a.jpg", MediaType::Photo);
        moment.set_media(media.clone());

        let record = moment.to_record();
        moment.apply_record(record).unwrap();
        assert!(Arc::ptr_eq(&moment.media().unwrap(), &media));
    }

    #[tokio::test]
    async fn test_batch_retrieve_brings_in_missing_markups() -> anyhow::Result<()> {
        let author = StorageContext::in_memory();
        let moment = Moment::new(&author);
        moment.add_markup(Markup::new(&author, None, json!({"text": "hot"})));
        moment.add_markup(Markup::new(&author, None, json!({"text": "cold"})));
        moment
            .save_recursive(StorageLocation::Both, LocalType::Draft, None)
            .await?;

        let reader = StorageContext::with_stores(
            Arc::new(crate::db::MemoryLocalStore::new()),
            author.remote().clone(),
            Default::default(),
        )?;
        let copy = Moment::with_id(&reader, moment.id());
        copy.retrieve_from_local_then_server(false, LocalType::Cache, Default::default())
            .await?;
        assert!(copy.markups().iter().all(|m| !m.is_retrieved()));

        let count = Moment::batch_retrieve(&[copy.clone()], LocalType::Cache)
            .await
            .unwrap()?;
        assert_eq!(count, 1);
        assert!(copy.markups().iter().all(|m| m.is_retrieved()));
        assert_eq!(copy.markups()[1].data(), json!({"text": "cold"}));
        assert!(Moment::batch_retrieve(&[copy], LocalType::Cache)
            .await
            .is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_retrieve_reports_records_the_server_lacks() {
        let context = StorageContext::in_memory();
        let present = Moment::new(&context);
        present
            .save_recursive(StorageLocation::Both, LocalType::Draft, None)
            .await
            .unwrap();

        let moments = vec![
            Moment::with_id(&context, present.id()),
            Moment::with_id(&context, "gone"),
        ];
        let err = Moment::batch_retrieve(&moments, LocalType::Cache)
            .await
            .unwrap()
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("gone"));
        assert!(moments[0].is_retrieved());
    }

    #[tokio::test]
    async fn test_batch_retrieve_skips_when_all_retrieved() {
        let context = StorageContext::in_memory();
        let moments = vec![Moment::new(&context), Moment::new(&context)];
        assert!(Moment::batch_retrieve(&moments, LocalType::Cache)
            .await
            .is_none());
    }
}
