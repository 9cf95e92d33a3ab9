//! Install / activate lifecycle and version cutover.
//!
//! ```text
//! idle ──install()──▶ installing ──ok──▶ installed ──activate()──▶ activating ──▶ active
//!   ▲                     │
//!   └──────fetch/store error (partial writes undone)
//! ```
//!
//! Install is all-or-nothing: every manifest resource is fetched before any
//! is written, and writes made before a storage failure are rolled back to
//! whatever was cached before the attempt.
//! Activation deletes every namespace of ours whose version tag differs from
//! the running build, trims every retained tier, and only then reports
//! `active` and claims open clients.

use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::classifier::{ClassifierError, RequestClassifier};
use crate::clients::ClientRegistry;
use crate::entry::CacheEntry;
use crate::eviction::EvictionManager;
use crate::fetch::{FetchError, Fetcher};
use crate::http::{Request, Response};
use crate::store::{StorageError, TierStore};
use crate::tier::{Tier, TierSet, STATIC_TIER};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Idle,
    Installing,
    Installed,
    Activating,
    Active,
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Cannot {action} while {phase:?}")]
    InvalidTransition {
        action: &'static str,
        phase: LifecyclePhase,
    },

    #[error("Static manifest unavailable: {0}")]
    Manifest(#[from] ClassifierError),

    #[error("Tier '{0}' is not configured")]
    MissingTier(&'static str),

    #[error("Failed to fetch manifest resource {url}: {source}")]
    ManifestFetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Manifest resource {url} returned status {status}")]
    ManifestStatus { url: String, status: u16 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    pub deleted_namespaces: Vec<String>,
    pub evicted_entries: usize,
    pub claimed_clients: usize,
}

pub struct LifecycleCoordinator {
    store: TierStore,
    tiers: Arc<TierSet>,
    eviction: EvictionManager,
    fetcher: Arc<dyn Fetcher>,
    classifier: Arc<RequestClassifier>,
    clients: Arc<ClientRegistry>,
    phase: watch::Sender<LifecyclePhase>,
}

impl LifecycleCoordinator {
    pub fn new(
        store: TierStore,
        tiers: Arc<TierSet>,
        fetcher: Arc<dyn Fetcher>,
        classifier: Arc<RequestClassifier>,
        clients: Arc<ClientRegistry>,
    ) -> Self {
        let (phase, _) = watch::channel(LifecyclePhase::Idle);
        Self {
            eviction: EvictionManager::new(store.clone()),
            store,
            tiers,
            fetcher,
            classifier,
            clients,
            phase,
        }
    }

    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// Observe phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    fn set_phase(&self, phase: LifecyclePhase) {
        let previous = self.phase.send_replace(phase);
        debug!(from = ?previous, to = ?phase, version = %self.store.version(), "Lifecycle transition");
    }

    fn static_tier(&self) -> Result<&Tier, LifecycleError> {
        self.tiers
            .get(STATIC_TIER)
            .ok_or(LifecycleError::MissingTier(STATIC_TIER))
    }

    /// Fetch the whole static manifest into the static tier.
    ///
    /// Returns the number of resources stored. On failure the phase returns to
    /// `idle` so a later call can retry.
    #[tracing::instrument(skip(self), fields(version = %self.store.version()))]
    pub async fn install(&self) -> Result<usize, LifecycleError> {
        let phase = self.phase();
        if phase != LifecyclePhase::Idle {
            return Err(LifecycleError::InvalidTransition {
                action: "install",
                phase,
            });
        }
        self.set_phase(LifecyclePhase::Installing);

        match self.install_manifest().await {
            Ok(count) => {
                self.set_phase(LifecyclePhase::Installed);
                info!(resources = count, "Install complete");
                Ok(count)
            }
            Err(e) => {
                self.set_phase(LifecyclePhase::Idle);
                warn!(error = %e, "Install failed, will retry on next start");
                Err(e)
            }
        }
    }

    async fn install_manifest(&self) -> Result<usize, LifecycleError> {
        let tier = self.static_tier()?;
        let urls = self.classifier.manifest_urls()?;

        let fetches = urls.into_iter().map(|url| async move {
            let request = Request::get(url);
            let key = request.cache_key();
            let response = self
                .fetcher
                .fetch(&request)
                .await
                .map_err(|source| LifecycleError::ManifestFetch {
                    url: key.clone(),
                    source,
                })?;
            if !response.is_success() {
                return Err(LifecycleError::ManifestStatus {
                    url: key,
                    status: response.status,
                });
            }
            Ok::<(String, Response), LifecycleError>((key, response))
        });
        let resources = try_join_all(fetches).await?;

        // Entries cached before this attempt are restored if a write fails
        let mut previous = Vec::with_capacity(resources.len());
        for (key, _) in &resources {
            previous.push(self.store.get(tier, key).await?);
        }

        for (done, (key, response)) in resources.iter().enumerate() {
            if let Err(e) = self.store.put(tier, key, response).await {
                self.roll_back(tier, &resources[..done], &mut previous).await;
                return Err(e.into());
            }
        }

        if let Err(e) = self.eviction.trim(tier).await {
            warn!(tier = %tier.name, error = %e, "Post-install trim failed");
        }
        Ok(resources.len())
    }

    async fn roll_back(&self, tier: &Tier, written: &[(String, Response)], previous: &mut [Option<CacheEntry>]) {
        for ((key, _), prior) in written.iter().zip(previous.iter_mut()) {
            let result = match prior.take() {
                Some(entry) => self.store.put_entry(tier, entry).await,
                None => self.store.delete(tier, key).await.map(|_| ()),
            };
            if let Err(e) = result {
                warn!(url = %key, error = %e, "Failed to roll back partial install");
            }
        }
    }

    /// True when every manifest resource is already present for this version.
    pub async fn is_installed(&self) -> Result<bool, LifecycleError> {
        let tier = self.static_tier()?;
        let keys = self.store.keys(tier).await?;
        let urls = self.classifier.manifest_urls()?;
        Ok(urls
            .into_iter()
            .all(|url| keys.iter().any(|k| *k == Request::get(url.clone()).cache_key())))
    }

    /// Remove other versions, trim retained tiers, then take over clients.
    #[tracing::instrument(skip(self), fields(version = %self.store.version()))]
    pub async fn activate(&self) -> Result<ActivationReport, LifecycleError> {
        let phase = self.phase();
        if phase != LifecyclePhase::Installed {
            return Err(LifecycleError::InvalidTransition {
                action: "activate",
                phase,
            });
        }
        self.set_phase(LifecyclePhase::Activating);

        let current = self.store.version().clone();
        let deleted = match self
            .store
            .delete_namespace(|ns| ns.version != current)
            .await
        {
            Ok(deleted) => deleted,
            Err(e) => {
                self.set_phase(LifecyclePhase::Installed);
                warn!(error = %e, "Activation failed while deleting old namespaces");
                return Err(e.into());
            }
        };
        for name in &deleted {
            info!(namespace = %name, "Deleted namespace from previous version");
        }

        let trims = self.tiers.iter().map(|tier| async move {
            match self.eviction.trim(tier).await {
                Ok(n) => n,
                Err(e) => {
                    warn!(tier = %tier.name, error = %e, "Activation trim failed");
                    0
                }
            }
        });
        let evicted_entries: usize = join_all(trims).await.into_iter().sum();

        self.set_phase(LifecyclePhase::Active);
        let claimed_clients = self.clients.claim(&current);
        info!(
            deleted = deleted.len(),
            evicted = evicted_entries,
            claimed = claimed_clients,
            "Activated"
        );

        Ok(ActivationReport {
            deleted_namespaces: deleted,
            evicted_entries,
            claimed_clients,
        })
    }

    /// Bring the running build to `active`: install unless a complete install
    /// for this version already exists, then activate.
    pub async fn startup(&self) -> Result<ActivationReport, LifecycleError> {
        if self.phase() == LifecyclePhase::Idle {
            if self.is_installed().await? {
                debug!("Existing install found for this version");
                self.set_phase(LifecyclePhase::Installed);
            } else {
                self.install().await?;
            }
        }
        self.activate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::store::{MemoryBackend, StorageBackend};
    use crate::tier::VersionTag;
    use async_trait::async_trait;

    struct AlwaysOk;

    #[async_trait]
    impl Fetcher for AlwaysOk {
        async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
            Ok(Response::new(200, request.url.path().to_string()))
        }
    }

    /// Memory backend that refuses to store keys ending in `fail_suffix`.
    struct FailingPut {
        inner: MemoryBackend,
        fail_suffix: &'static str,
    }

    #[async_trait]
    impl StorageBackend for FailingPut {
        async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
            self.inner.get(namespace, key).await
        }

        async fn put(&self, namespace: &str, entry: CacheEntry) -> Result<(), StorageError> {
            if entry.key.ends_with(self.fail_suffix) {
                return Err(StorageError::Backend("disk full".to_string()));
            }
            self.inner.put(namespace, entry).await
        }

        async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
            self.inner.delete(namespace, key).await
        }

        async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
            self.inner.keys(namespace).await
        }

        async fn namespaces(&self) -> Result<Vec<String>, StorageError> {
            self.inner.namespaces().await
        }

        async fn delete_namespace(&self, namespace: &str) -> Result<bool, StorageError> {
            self.inner.delete_namespace(namespace).await
        }
    }

    fn coordinator(version: &str) -> LifecycleCoordinator {
        coordinator_with(Arc::new(MemoryBackend::new()), version)
    }

    fn coordinator_with(backend: Arc<dyn StorageBackend>, version: &str) -> LifecycleCoordinator {
        let mut config = CacheConfig::default();
        config.origin = Some("https://meals.example".to_string());
        config.static_manifest = vec!["/".into(), "/app.js".into()];
        let store = TierStore::new(backend, "mealcache", VersionTag::new(version).unwrap());
        LifecycleCoordinator::new(
            store,
            Arc::new(TierSet::new(config.tiers.clone())),
            Arc::new(AlwaysOk),
            Arc::new(RequestClassifier::new(&config).unwrap()),
            Arc::new(ClientRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_activate_requires_install() {
        let lc = coordinator("v1");
        let err = lc.activate().await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidTransition {
                action: "activate",
                phase: LifecyclePhase::Idle
            }
        ));
    }

    #[tokio::test]
    async fn test_phases_progress() {
        let lc = coordinator("v1");
        let mut rx = lc.subscribe();
        assert_eq!(lc.phase(), LifecyclePhase::Idle);

        assert_eq!(lc.install().await.unwrap(), 2);
        assert_eq!(lc.phase(), LifecyclePhase::Installed);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), LifecyclePhase::Installed);

        lc.activate().await.unwrap();
        assert_eq!(lc.phase(), LifecyclePhase::Active);

        assert!(matches!(
            lc.install().await,
            Err(LifecycleError::InvalidTransition { action: "install", .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_install_keeps_earlier_cache() {
        let backend = Arc::new(FailingPut {
            inner: MemoryBackend::new(),
            fail_suffix: "/app.js",
        });
        let lc = coordinator_with(backend, "v1");
        let tier = lc.tiers.get(STATIC_TIER).unwrap().clone();
        lc.store
            .put(&tier, "https://meals.example/", &Response::new(200, "cached earlier"))
            .await
            .unwrap();

        assert!(matches!(lc.install().await, Err(LifecycleError::Storage(_))));
        assert_eq!(lc.phase(), LifecyclePhase::Idle);

        let kept = lc.store.get(&tier, "https://meals.example/").await.unwrap().unwrap();
        assert_eq!(kept.payload.body_text(), "cached earlier");
        assert_eq!(lc.store.keys(&tier).await.unwrap(), vec!["https://meals.example/"]);
    }

    #[tokio::test]
    async fn test_failed_install_removes_new_writes() {
        let backend = Arc::new(FailingPut {
            inner: MemoryBackend::new(),
            fail_suffix: "/app.js",
        });
        let lc = coordinator_with(backend, "v1");
        let tier = lc.tiers.get(STATIC_TIER).unwrap().clone();

        assert!(lc.install().await.is_err());
        assert!(lc.store.keys(&tier).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_is_installed_after_install() {
        let lc = coordinator("v1");
        assert!(!lc.is_installed().await.unwrap());
        lc.install().await.unwrap();
        assert!(lc.is_installed().await.unwrap());
    }

    #[tokio::test]
    async fn test_startup_installs_then_activates() {
        let lc = coordinator("v1");
        let id = lc.clients().open();
        let report = lc.startup().await.unwrap();
        assert_eq!(lc.phase(), LifecyclePhase::Active);
        assert_eq!(report.claimed_clients, 1);
        assert_eq!(lc.clients().controller(id).unwrap().as_str(), "v1");
    }
}
