use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::dispatcher::{DispatchOutcome, SyncTaskDispatcher};
use crate::retry::{retry, RetryConfig};

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedQueue {
    tags: Vec<String>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<String>,
    in_flight: BTreeSet<String>,
    /// Tags whose retry budget ran out; redelivered by the next drain.
    deferred: Vec<String>,
}

impl QueueState {
    /// Everything that has not been delivered yet, in delivery order.
    fn outstanding(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.in_flight.iter().cloned().collect();
        tags.extend(self.pending.iter().filter(|t| !self.in_flight.contains(*t)).cloned());
        for tag in &self.deferred {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        tags
    }

    fn requeue_deferred(&mut self) {
        for tag in std::mem::take(&mut self.deferred) {
            if !self.pending.contains(&tag) {
                self.pending.push_back(tag);
            }
        }
    }
}

/// Result of one `drain()` pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: Vec<String>,
    pub ignored: Vec<String>,
    /// Tags that kept failing until the retry budget ran out. They stay
    /// queued for the next drain.
    pub deferred: Vec<String>,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.ignored.is_empty() && self.deferred.is_empty()
    }
}

/// At-least-once redelivery of sync tags.
///
/// A tag is its own idempotency key: signalling a tag that is already pending
/// does not queue it twice. A tag signalled while its handler is running is
/// queued again so the newer work is not lost. A tag is only forgotten once
/// its handler succeeds or no handler exists for it.
pub struct SyncQueue {
    dispatcher: Arc<SyncTaskDispatcher>,
    retry: RetryConfig,
    state: Mutex<QueueState>,
    path: Option<PathBuf>,
}

impl SyncQueue {
    /// In-memory queue.
    pub fn new(dispatcher: Arc<SyncTaskDispatcher>, retry: RetryConfig) -> Self {
        Self {
            dispatcher,
            retry,
            state: Mutex::new(QueueState::default()),
            path: None,
        }
    }

    /// Queue whose outstanding tags are kept in a JSON file at `path`.
    /// Tags left over from a previous run are loaded as pending.
    pub fn persistent(dispatcher: Arc<SyncTaskDispatcher>, retry: RetryConfig, path: &Path) -> Result<Self> {
        let mut state = QueueState::default();
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read sync queue from {:?}", path))?;
            let persisted: PersistedQueue = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse sync queue at {:?}", path))?;
            for tag in persisted.tags {
                if !state.pending.contains(&tag) {
                    state.pending.push_back(tag);
                }
            }
            if !state.pending.is_empty() {
                info!(pending = state.pending.len(), "Restored pending sync tags");
            }
        }

        Ok(Self {
            dispatcher,
            retry,
            state: Mutex::new(state),
            path: Some(path.to_path_buf()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the queue half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `tag` for delivery. Returns false if it was already pending.
    pub fn signal(&self, tag: &str) -> bool {
        let snapshot = {
            let mut state = self.lock();
            if state.pending.iter().any(|t| t == tag) {
                debug!(tag, "Sync tag already pending");
                return false;
            }
            state.deferred.retain(|t| t != tag);
            state.pending.push_back(tag.to_string());
            state.outstanding()
        };
        debug!(tag, "Sync tag queued");
        self.persist(&snapshot);
        true
    }

    pub fn pending(&self) -> Vec<String> {
        self.lock().pending.iter().cloned().collect()
    }

    /// Tags that exhausted their retries and wait for the next drain.
    pub fn deferred(&self) -> Vec<String> {
        self.lock().deferred.clone()
    }

    pub fn is_empty(&self) -> bool {
        let state = self.lock();
        state.pending.is_empty() && state.in_flight.is_empty() && state.deferred.is_empty()
    }

    /// Deliver every pending and deferred tag, retrying failed handlers with
    /// backoff.
    ///
    /// Tags signalled during the drain are delivered in the same pass. Tags
    /// that still fail are deferred to the next drain, not retried again here.
    #[tracing::instrument(skip(self))]
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        self.lock().requeue_deferred();

        loop {
            let tag = {
                let mut state = self.lock();
                let Some(tag) = state.pending.pop_front() else {
                    break;
                };
                state.in_flight.insert(tag.clone());
                tag
            };

            let dispatcher = &self.dispatcher;
            let outcome = retry(&tag, &self.retry, || dispatcher.dispatch(&tag)).await;
            let failed = match outcome {
                Ok(DispatchOutcome::Completed) => {
                    report.completed.push(tag.clone());
                    false
                }
                Ok(DispatchOutcome::UnknownTag) => {
                    report.ignored.push(tag.clone());
                    false
                }
                Err(e) => {
                    error!(tag = %tag, error = %e, "Sync task exhausted retries, deferring to next drain");
                    report.deferred.push(tag.clone());
                    true
                }
            };

            let snapshot = {
                let mut state = self.lock();
                state.in_flight.remove(&tag);
                if failed && !state.pending.contains(&tag) && !state.deferred.contains(&tag) {
                    state.deferred.push(tag.clone());
                }
                state.outstanding()
            };
            self.persist(&snapshot);
        }

        if !report.is_empty() {
            info!(
                completed = report.completed.len(),
                ignored = report.ignored.len(),
                deferred = report.deferred.len(),
                "Sync queue drained"
            );
        }
        report
    }

    /// Consume connectivity-restore signals: each received tag is queued and
    /// the queue drained. Ends when every sender is dropped.
    pub fn spawn_worker(self: Arc<Self>, mut signals: mpsc::Receiver<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(tag) = signals.recv().await {
                self.signal(&tag);
                self.drain().await;
            }
            debug!("Sync signal channel closed");
        })
    }

    fn persist(&self, tags: &[String]) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_queue(path, tags) {
            warn!(path = %path.display(), error = %e, "Failed to persist sync queue");
        }
    }
}

fn write_queue(path: &Path, tags: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create sync queue directory {:?}", parent))?;
    }
    let content = serde_json::to_string_pretty(&PersistedQueue { tags: tags.to_vec() })?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).with_context(|| format!("Failed to write sync queue to {:?}", tmp))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace sync queue at {:?}", path))?;
    Ok(())
}
