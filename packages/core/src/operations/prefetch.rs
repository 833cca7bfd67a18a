//! Story prefetch
//!
//! Viewing a story should not wait on the network page by page. A prefetch
//! step brings the next piece of a story on-device:
//!
//! 1. if any moments have never been loaded, fetch them all in one batch
//! 2. otherwise retrieve the first moment (and its media and markups) that
//!    is not ready yet
//! 3. otherwise report [`PrefetchStep::AllRetrieved`]
//!
//! Steps are wrapped in [`ObjectTask`]s so a [`FetchQueue`] can bound and
//! prioritise them; [`queue_all_media`] re-queues itself after each step
//! until the story is complete.

use crate::behaviors::{ObjectDelegate, ReadySignal};
use crate::models::{LocalType, Moment, StorageLocation, Story};
use crate::operations::{CancelScope, ObjectTask, OperationKind, PersistError, TaskHandle};
use crate::services::{FetchQueue, Priority};
use std::sync::Arc;

/// What a single prefetch step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchStep {
    /// A batch request brought in this many moment records
    Batched(usize),
    /// The moment at `index` was retrieved with its children
    Retrieved { index: usize, moment_id: String },
    /// Nothing left to fetch
    AllRetrieved,
}

/// Perform one prefetch step on `story`
pub async fn prefetch_next(
    story: &Story,
    scope: &CancelScope,
) -> Result<PrefetchStep, PersistError> {
    scope.check(story.id())?;
    if !story.is_retrieved() {
        story
            .retrieve_from_local_then_server(false, LocalType::Cache, ReadySignal::none())
            .await?;
    }

    let moments = story.moments();
    if let Some(batch) = Moment::batch_retrieve(&moments, LocalType::Cache).await {
        let count = batch?;
        tracing::debug!("Story {}: batch retrieved {} moments", story.id(), count);
        return Ok(PrefetchStep::Batched(count));
    }

    for (index, moment) in moments.iter().enumerate() {
        if moment.is_ready() {
            continue;
        }
        scope.check(story.id())?;
        tracing::debug!(
            "Story {}: prefetching moment {}/{} ({})",
            story.id(),
            index + 1,
            moments.len(),
            moment.id()
        );
        moment
            .retrieve_recursive(
                StorageLocation::Both,
                LocalType::Cache,
                false,
                Some(scope),
                ReadySignal::none(),
            )
            .await?;
        return Ok(PrefetchStep::Retrieved {
            index,
            moment_id: moment.id().to_string(),
        });
    }

    Ok(PrefetchStep::AllRetrieved)
}

/// Run prefetch steps until the story is complete, returning the number of
/// steps that fetched something
pub async fn prefetch_all(story: &Story, scope: &CancelScope) -> Result<usize, PersistError> {
    let mut steps = 0;
    loop {
        match prefetch_next(story, scope).await? {
            PrefetchStep::AllRetrieved => return Ok(steps),
            _ => steps += 1,
        }
    }
}

/// Task retrieving the moment at `index` (with its media and markups)
pub fn moment_task(story: Arc<Story>, index: usize) -> ObjectTask {
    let target = story.clone();
    ObjectTask::new(OperationKind::PrefetchMoment, target, move |scope| async move {
        let moment = story.moments().get(index).cloned().ok_or_else(|| {
            PersistError::internal(format!(
                "story {} has no moment at index {}",
                story.id(),
                index
            ))
        })?;
        moment
            .retrieve_recursive(
                StorageLocation::Both,
                LocalType::Cache,
                false,
                Some(&scope),
                ReadySignal::none(),
            )
            .await
    })
}

/// Task performing a single prefetch step
pub fn next_media_task(story: Arc<Story>) -> ObjectTask {
    let target = story.clone();
    ObjectTask::new(OperationKind::PrefetchNextMedia, target, move |scope| async move {
        prefetch_next(&story, &scope).await.map(|_| ())
    })
}

/// Queue prefetch steps for `story` one after another until it is complete
///
/// Each step is its own queued task, so a step for another story with higher
/// priority can get in between. Returns the handle of the first step.
pub fn queue_all_media(queue: &FetchQueue, story: Arc<Story>, priority: Priority) -> TaskHandle {
    let target = story.clone();
    let requeue = queue.clone();
    let mut task = ObjectTask::new(OperationKind::PrefetchAllMedia, target, move |scope| async move {
        match prefetch_next(&story, &scope).await {
            Ok(PrefetchStep::AllRetrieved) => {
                tracing::info!("Story {}: all moments prefetched", story.id());
                Ok(())
            }
            Ok(_) => {
                queue_all_media(&requeue, story, priority);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Story {}: prefetch stopped: {}", story.id(), e);
                Err(e)
            }
        }
    });
    queue.queue(&mut task, priority)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryRemoteStore, RemoteStore};
    use crate::models::{Media, MediaType};
    use crate::services::StorageContext;

    async fn published_story(moments: usize) -> (Arc<StorageContext>, String) {
        let author = StorageContext::in_memory();
        let story = Story::new(&author);
        for i in 0..moments {
            let moment = Moment::new(&author);
            moment.set_media(Media::new(&author, format!("{}.jpg", i), MediaType::Photo));
            story.add_moment(moment);
        }
        story
            .save_recursive(StorageLocation::Both, LocalType::Draft, None)
            .await
            .unwrap();
        (author, story.id().to_string())
    }

    #[tokio::test]
    async fn test_steps_batch_then_moments_then_done() {
        let (author, story_id) = published_story(2).await;
        let reader = StorageContext::with_stores(
            Arc::new(crate::db::MemoryLocalStore::default()),
            author.remote().clone(),
            Default::default(),
        )
        .unwrap();

        let story = Story::with_id(&reader, story_id);
        let scope = CancelScope::new();

        assert_eq!(prefetch_next(&story, &scope).await.unwrap(), PrefetchStep::Batched(2));
        assert!(matches!(
            prefetch_next(&story, &scope).await.unwrap(),
            PrefetchStep::Retrieved { index: 0, .. }
        ));
        assert!(matches!(
            prefetch_next(&story, &scope).await.unwrap(),
            PrefetchStep::Retrieved { index: 1, .. }
        ));
        assert_eq!(
            prefetch_next(&story, &scope).await.unwrap(),
            PrefetchStep::AllRetrieved
        );
        assert!(story.moments().iter().all(|m| m.is_ready()));
    }

    #[tokio::test]
    async fn test_moment_missing_on_server_ends_prefetch_with_error() {
        let (author, story_id) = published_story(2).await;
        let gone = Story::with_id(&author, story_id.clone());
        gone.retrieve(LocalType::Draft, false).await.unwrap();
        let gone_id = gone.moments()[1].id().to_string();
        author.remote().delete(&gone_id).await.unwrap();

        let reader = StorageContext::with_stores(
            Arc::new(crate::db::MemoryLocalStore::default()),
            author.remote().clone(),
            Default::default(),
        )
        .unwrap();
        let story = Story::with_id(&reader, story_id);
        let scope = CancelScope::new();

        let err = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            prefetch_all(&story, &scope),
        )
        .await
        .expect("prefetch must not spin on a missing record")
        .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains(&gone_id));
    }

    #[tokio::test]
    async fn test_cancelled_scope_stops_prefetch() {
        let context = StorageContext::in_memory();
        let story = Story::new(&context);
        let scope = CancelScope::new();
        scope.cancel();

        let err = prefetch_all(&story, &scope).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_story_is_already_complete() {
        let context = StorageContext::with_stores(
            Arc::new(crate::db::MemoryLocalStore::default()),
            Arc::new(MemoryRemoteStore::new()),
            Default::default(),
        )
        .unwrap();
        let story = Story::new(&context);
        assert_eq!(prefetch_all(&story, &CancelScope::new()).await.unwrap(), 0);
    }
}
