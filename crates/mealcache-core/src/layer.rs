//! Assembled cache layer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::classifier::{ClassifierError, RequestClassifier};
use crate::clients::ClientRegistry;
use crate::config::CacheConfig;
use crate::entry;
use crate::executor::StrategyExecutor;
use crate::fallback::FallbackSynthesizer;
use crate::fetch::Fetcher;
use crate::http::{Request, Response};
use crate::lifecycle::{LifecycleCoordinator, LifecyclePhase};
use crate::store::{StorageBackend, StorageError, TierStore};
use crate::tier::{TierSet, VersionTag};

/// Entry counts and freshness of one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierStatus {
    pub tier: String,
    pub namespace: String,
    pub entries: usize,
    pub max_entries: usize,
    pub newest: Option<DateTime<Utc>>,
}

impl TierStatus {
    /// "5m ago", or "empty" when the tier holds nothing.
    pub fn newest_age(&self) -> String {
        match self.newest {
            Some(at) => entry::age_display((Utc::now() - at).num_minutes()),
            None => "empty".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStatus {
    pub version: VersionTag,
    pub phase: LifecyclePhase,
    pub tiers: Vec<TierStatus>,
    /// Our namespaces that belong to another version and await activation cleanup.
    pub stale_namespaces: Vec<String>,
}

impl CacheStatus {
    pub fn total_entries(&self) -> usize {
        self.tiers.iter().map(|t| t.entries).sum()
    }
}

/// Every component wired together for one build version.
pub struct CacheLayer {
    config: CacheConfig,
    tiers: Arc<TierSet>,
    store: TierStore,
    executor: StrategyExecutor,
    lifecycle: LifecycleCoordinator,
}

impl CacheLayer {
    pub fn new(
        config: CacheConfig,
        backend: Arc<dyn StorageBackend>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ClassifierError> {
        let classifier = Arc::new(RequestClassifier::new(&config)?);
        let tiers = Arc::new(TierSet::new(config.tiers.clone()));
        let store = TierStore::new(backend, config.namespace_prefix.clone(), config.version.clone());

        let executor = StrategyExecutor::new(
            classifier.clone(),
            tiers.clone(),
            store.clone(),
            fetcher.clone(),
            FallbackSynthesizer::default(),
        );
        let lifecycle = LifecycleCoordinator::new(
            store.clone(),
            tiers.clone(),
            fetcher,
            classifier,
            Arc::new(ClientRegistry::new()),
        );

        debug!(version = %config.version, tiers = tiers.len(), "Cache layer assembled");
        Ok(Self {
            config,
            tiers,
            store,
            executor,
            lifecycle,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    pub fn store(&self) -> &TierStore {
        &self.store
    }

    pub fn executor(&self) -> &StrategyExecutor {
        &self.executor
    }

    pub fn lifecycle(&self) -> &LifecycleCoordinator {
        &self.lifecycle
    }

    pub async fn handle(&self, request: &Request) -> Response {
        self.executor.handle(request).await
    }

    /// Wait for background revalidation and trims.
    pub async fn settle(&self) {
        self.executor.settle().await;
    }

    pub async fn status(&self) -> Result<CacheStatus, StorageError> {
        let mut tiers = Vec::with_capacity(self.tiers.len());
        for tier in self.tiers.iter() {
            let keys = self.store.keys(tier).await?;
            let newest = match keys.last() {
                Some(key) => self.store.get(tier, key).await?.map(|e| e.stored_at),
                None => None,
            };
            tiers.push(TierStatus {
                tier: tier.name.clone(),
                namespace: self.store.namespace(tier),
                entries: keys.len(),
                max_entries: tier.max_entries,
                newest,
            });
        }

        let current = self.store.version();
        let stale_namespaces = self
            .store
            .owned_namespaces()
            .await?
            .into_iter()
            .filter(|(_, parsed)| parsed.version != *current)
            .map(|(name, _)| name)
            .collect();

        Ok(CacheStatus {
            version: current.clone(),
            phase: self.lifecycle.phase(),
            tiers,
            stale_namespaces,
        })
    }
}
