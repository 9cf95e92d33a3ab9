//! Deferred work executed when connectivity returns.
//!
//! `SyncTaskDispatcher` maps a tag to its handler. `SyncQueue` sits on top and
//! redelivers tags until their handler succeeds or the retry budget runs out.

mod dispatcher;
mod queue;

pub use dispatcher::{
    DispatchOutcome, SyncError, SyncHandler, SyncTaskDispatcher, SyncTaskDispatcherBuilder, ANALYTICS_SYNC,
    MEAL_PLAN_SYNC, SOCIAL_ACTIONS_SYNC, USER_PREFERENCES_SYNC,
};
pub use queue::{DrainReport, SyncQueue};

/// The tags a default build registers handlers for.
pub const DEFAULT_TAGS: [&str; 4] = [MEAL_PLAN_SYNC, USER_PREFERENCES_SYNC, SOCIAL_ACTIONS_SYNC, ANALYTICS_SYNC];
