use std::sync::{Arc, Mutex};

use mealcache_core::sync::{DEFAULT_TAGS, MEAL_PLAN_SYNC, SOCIAL_ACTIONS_SYNC};
use mealcache_core::{DispatchOutcome, RetryConfig, SyncQueue, SyncTaskDispatcher};

fn recording_dispatcher(log: Arc<Mutex<Vec<String>>>) -> SyncTaskDispatcher {
    DEFAULT_TAGS.iter().fold(SyncTaskDispatcher::builder(), |builder, tag| {
        let log = log.clone();
        builder.register(*tag, move |tag: String| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(tag);
                Ok::<(), anyhow::Error>(())
            }
        })
    })
    .build()
}

#[tokio::test]
async fn default_tags_are_routed_to_their_handlers() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = recording_dispatcher(log.clone());

    for tag in DEFAULT_TAGS {
        assert_eq!(dispatcher.dispatch(tag).await.unwrap(), DispatchOutcome::Completed);
    }
    assert_eq!(dispatcher.dispatch("foo-sync").await.unwrap(), DispatchOutcome::UnknownTag);
    assert_eq!(*log.lock().unwrap(), DEFAULT_TAGS.to_vec());
}

#[tokio::test]
async fn queue_delivers_each_pending_tag_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let queue = SyncQueue::new(Arc::new(recording_dispatcher(log.clone())), RetryConfig::test());

    queue.signal(MEAL_PLAN_SYNC);
    queue.signal(SOCIAL_ACTIONS_SYNC);
    queue.signal(MEAL_PLAN_SYNC);
    queue.signal("foo-sync");

    let report = queue.drain().await;
    assert_eq!(report.completed, vec![MEAL_PLAN_SYNC, SOCIAL_ACTIONS_SYNC]);
    assert_eq!(report.ignored, vec!["foo-sync"]);
    assert_eq!(*log.lock().unwrap(), vec![MEAL_PLAN_SYNC, SOCIAL_ACTIONS_SYNC]);

    // Nothing left to deliver
    assert!(queue.drain().await.is_empty());
}
