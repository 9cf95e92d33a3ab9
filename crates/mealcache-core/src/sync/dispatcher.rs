use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

/// Meal plan changes made offline.
pub const MEAL_PLAN_SYNC: &str = "meal-plan-sync";

/// User preference changes made offline.
pub const USER_PREFERENCES_SYNC: &str = "user-preferences-sync";

/// Likes, follows, shares queued offline.
pub const SOCIAL_ACTIONS_SYNC: &str = "social-actions-sync";

/// Buffered analytics events.
pub const ANALYTICS_SYNC: &str = "analytics-sync";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync handler for '{tag}' failed: {error:#}")]
    HandlerFailed { tag: String, error: anyhow::Error },
}

/// A deferred unit of work run when connectivity returns.
///
/// Delivery is at-least-once: a handler may run again after a failure, or
/// after partially completing. Implementations must be idempotent.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn run(&self, tag: &str) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> SyncHandler for F
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, tag: &str) -> anyhow::Result<()> {
        (self)(tag.to_string()).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    /// No handler is registered for the tag; nothing ran.
    UnknownTag,
}

/// Immutable tag → handler table.
pub struct SyncTaskDispatcher {
    handlers: HashMap<String, Arc<dyn SyncHandler>>,
}

#[derive(Default)]
pub struct SyncTaskDispatcherBuilder {
    handlers: HashMap<String, Arc<dyn SyncHandler>>,
}

impl SyncTaskDispatcherBuilder {
    /// Register `handler` for `tag`. A later registration for the same tag
    /// replaces the earlier one.
    pub fn register(mut self, tag: impl Into<String>, handler: impl SyncHandler + 'static) -> Self {
        let tag = tag.into();
        if self.handlers.insert(tag.clone(), Arc::new(handler)).is_some() {
            warn!(tag = %tag, "Sync handler registered twice, keeping the latest");
        }
        self
    }

    pub fn build(self) -> SyncTaskDispatcher {
        SyncTaskDispatcher {
            handlers: self.handlers,
        }
    }
}

impl SyncTaskDispatcher {
    pub fn builder() -> SyncTaskDispatcherBuilder {
        SyncTaskDispatcherBuilder::default()
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.handlers.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Run the handler registered for `tag`.
    ///
    /// Unknown tags are logged and ignored. Handler failures are returned so
    /// the caller can schedule redelivery.
    #[tracing::instrument(skip(self))]
    pub async fn dispatch(&self, tag: &str) -> Result<DispatchOutcome, SyncError> {
        let Some(handler) = self.handlers.get(tag) else {
            warn!(tag, "No handler registered for sync tag, ignoring");
            return Ok(DispatchOutcome::UnknownTag);
        };

        match handler.run(tag).await {
            Ok(()) => {
                info!(tag, "Sync task completed");
                Ok(DispatchOutcome::Completed)
            }
            Err(error) => {
                warn!(tag, error = %error, "Sync task failed");
                Err(SyncError::HandlerFailed {
                    tag: tag.to_string(),
                    error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl SyncHandler for Counting {
        async fn run(&self, _tag: &str) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl SyncHandler for Failing {
        async fn run(&self, _tag: &str) -> anyhow::Result<()> {
            anyhow::bail!("backend returned 502")
        }
    }

    #[tokio::test]
    async fn test_dispatch_runs_registered_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let dispatcher = SyncTaskDispatcher::builder()
            .register(MEAL_PLAN_SYNC, Counting(count.clone()))
            .build();

        assert_eq!(dispatcher.dispatch(MEAL_PLAN_SYNC).await.unwrap(), DispatchOutcome::Completed);
        assert_eq!(dispatcher.dispatch(MEAL_PLAN_SYNC).await.unwrap(), DispatchOutcome::Completed);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_ignored() {
        let dispatcher = SyncTaskDispatcher::builder()
            .register(ANALYTICS_SYNC, Failing)
            .build();
        assert_eq!(dispatcher.dispatch("foo-sync").await.unwrap(), DispatchOutcome::UnknownTag);
    }

    #[tokio::test]
    async fn test_handler_failure_is_propagated() {
        let dispatcher = SyncTaskDispatcher::builder()
            .register(SOCIAL_ACTIONS_SYNC, Failing)
            .build();
        let err = dispatcher.dispatch(SOCIAL_ACTIONS_SYNC).await.unwrap_err();
        let SyncError::HandlerFailed { tag, error } = err;
        assert_eq!(tag, SOCIAL_ACTIONS_SYNC);
        assert!(error.to_string().contains("502"));
    }

    #[tokio::test]
    async fn test_closure_handlers() {
        let dispatcher = SyncTaskDispatcher::builder()
            .register(USER_PREFERENCES_SYNC, |tag: String| async move {
                anyhow::ensure!(tag == USER_PREFERENCES_SYNC, "wrong tag {}", tag);
                Ok(())
            })
            .build();
        assert!(dispatcher.is_registered(USER_PREFERENCES_SYNC));
        assert_eq!(dispatcher.tags(), vec![USER_PREFERENCES_SYNC]);
        assert_eq!(
            dispatcher.dispatch(USER_PREFERENCES_SYNC).await.unwrap(),
            DispatchOutcome::Completed
        );
    }
}
