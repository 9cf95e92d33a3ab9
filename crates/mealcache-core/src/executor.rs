//! Per-request strategy execution.
//!
//! `StrategyExecutor::handle` is the single entry point for intercepted
//! requests. It always resolves to a response: network failures fall back to
//! the tiers, storage failures are treated as misses, and when nothing is
//! available a synthesized offline response is returned.
//!
//! Writes happen only for 2xx network responses. Each successful write
//! schedules a trim of the written tier in the background; background
//! revalidation of stale static entries runs the same way. Both are tracked
//! so `settle()` can wait for them.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::{Classification, RequestClassifier, Route, Strategy};
use crate::entry::CacheEntry;
use crate::eviction::EvictionManager;
use crate::fallback::{FallbackKind, FallbackSynthesizer};
use crate::fetch::{fetch_with_timeout, FetchError, Fetcher};
use crate::http::{Request, Response};
use crate::store::TierStore;
use crate::tier::{Tier, TierSet};

/// Handles of spawned background work, pruned as tasks finish.
#[derive(Clone, Default)]
struct BackgroundTasks {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl BackgroundTasks {
    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        match self.handles.lock() {
            Ok(mut handles) => {
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            Err(_) => warn!("Background task list poisoned, task runs untracked"),
        }
    }

    fn take(&self) -> Vec<JoinHandle<()>> {
        self.handles
            .lock()
            .map(|mut handles| std::mem::take(&mut *handles))
            .unwrap_or_default()
    }

    /// Wait until no tracked task remains, including tasks spawned by tasks.
    async fn settle(&self) {
        loop {
            let pending = self.take();
            if pending.is_empty() {
                return;
            }
            for result in join_all(pending).await {
                if let Err(e) = result {
                    warn!(error = %e, "Background task panicked");
                }
            }
        }
    }
}

/// Orchestrates classification, tier reads/writes, eviction and fallback.
/// Clone is cheap - every component is shared.
#[derive(Clone)]
pub struct StrategyExecutor {
    classifier: Arc<RequestClassifier>,
    tiers: Arc<TierSet>,
    store: TierStore,
    eviction: EvictionManager,
    fetcher: Arc<dyn Fetcher>,
    fallback: Arc<FallbackSynthesizer>,
    background: BackgroundTasks,
}

impl StrategyExecutor {
    pub fn new(
        classifier: Arc<RequestClassifier>,
        tiers: Arc<TierSet>,
        store: TierStore,
        fetcher: Arc<dyn Fetcher>,
        fallback: FallbackSynthesizer,
    ) -> Self {
        Self {
            classifier,
            tiers,
            eviction: EvictionManager::new(store.clone()),
            store,
            fetcher,
            fallback: Arc::new(fallback),
            background: BackgroundTasks::default(),
        }
    }

    pub fn store(&self) -> &TierStore {
        &self.store
    }

    /// Serve a request. Never fails.
    #[tracing::instrument(skip(self, request), fields(url = %request.url, method = %request.method))]
    pub async fn handle(&self, request: &Request) -> Response {
        let route = match self.classifier.classify(request) {
            Classification::Passthrough => return self.passthrough(request).await,
            Classification::Cached(route) => route,
        };

        let Some(tier) = self.tiers.get(route.tier).cloned() else {
            warn!(tier = route.tier, "Route names an unconfigured tier, serving uncached");
            return self.uncached(request, &route).await;
        };

        debug!(class = %route.class, tier = %tier.name, strategy = %route.strategy, "Classified request");
        match route.strategy {
            Strategy::CacheFirstWithRevalidate => self.cache_first_revalidate(request, &route, &tier).await,
            Strategy::NetworkFirstWithCacheFallback | Strategy::NetworkFirstDefault => {
                self.network_first(request, &route, &tier).await
            }
            Strategy::CacheFirstSimple => self.cache_first(request, &route, &tier).await,
        }
    }

    /// Wait for every background revalidation and trim scheduled so far.
    pub async fn settle(&self) {
        self.background.settle().await;
    }

    async fn cache_first_revalidate(&self, request: &Request, route: &Route, tier: &Tier) -> Response {
        let key = request.cache_key();
        if let Some(entry) = self.read(tier, &key, route).await {
            if EvictionManager::is_stale(&entry, tier) {
                debug!(url = %key, tier = %tier.name, age = %entry.age_display(), "Serving stale entry, revalidating");
                self.spawn_revalidate(request.clone(), route.clone(), tier.clone());
            }
            return entry.into_response();
        }

        match self.fetch(request, route).await {
            Ok(response) => {
                self.write(tier, &key, &response, route).await;
                response
            }
            Err(e) => {
                warn!(url = %key, tier = %tier.name, strategy = %route.strategy, error = %e, "Fetch failed with nothing cached");
                self.fallback.synthesize(request, Some(route.class))
            }
        }
    }

    async fn network_first(&self, request: &Request, route: &Route, tier: &Tier) -> Response {
        let key = request.cache_key();
        let mirror = self.mirror_tier(route);

        match self.fetch(request, route).await {
            Ok(response) => {
                self.write(tier, &key, &response, route).await;
                if let Some(mirror) = &mirror {
                    self.write(mirror, &key, &response, route).await;
                }
                response
            }
            Err(e) => {
                warn!(url = %key, tier = %tier.name, strategy = %route.strategy, error = %e, "Network failed, trying cache");
                let primary = self.read(tier, &key, route).await;
                let mirrored = match &mirror {
                    Some(m) => self.read(m, &key, route).await,
                    None => None,
                };
                match newest(primary, mirrored) {
                    Some(entry) => {
                        info!(url = %key, tier = %tier.name, age = %entry.age_display(), "Served from cache after network failure");
                        entry.into_response()
                    }
                    None => self.fallback.synthesize(request, Some(route.class)),
                }
            }
        }
    }

    async fn cache_first(&self, request: &Request, route: &Route, tier: &Tier) -> Response {
        let key = request.cache_key();
        if let Some(entry) = self.read(tier, &key, route).await {
            return entry.into_response();
        }

        match self.fetch(request, route).await {
            Ok(response) => {
                self.write(tier, &key, &response, route).await;
                response
            }
            Err(e) => {
                warn!(url = %key, tier = %tier.name, strategy = %route.strategy, error = %e, "Fetch failed with nothing cached");
                self.fallback.synthesize(request, Some(route.class))
            }
        }
    }

    async fn uncached(&self, request: &Request, route: &Route) -> Response {
        match self.fetch(request, route).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, strategy = %route.strategy, error = %e, "Fetch failed for uncached route");
                self.fallback.synthesize(request, Some(route.class))
            }
        }
    }

    async fn passthrough(&self, request: &Request) -> Response {
        match self.fetcher.fetch(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %request.url, method = %request.method, error = %e, "Passthrough request failed");
                self.fallback.build(FallbackKind::Generic)
            }
        }
    }

    fn mirror_tier(&self, route: &Route) -> Option<Tier> {
        if route.strategy != Strategy::NetworkFirstWithCacheFallback {
            return None;
        }
        route.mirror_tier.and_then(|name| self.tiers.get(name).cloned())
    }

    async fn fetch(&self, request: &Request, route: &Route) -> Result<Response, FetchError> {
        fetch_with_timeout(self.fetcher.as_ref(), request, route.timeout).await
    }

    /// Read an entry, treating storage failures as a miss.
    async fn read(&self, tier: &Tier, key: &str, route: &Route) -> Option<CacheEntry> {
        match self.store.get(tier, key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(url = %key, tier = %tier.name, strategy = %route.strategy, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a successful response and schedule a trim. Failed writes are
    /// logged and not retried.
    async fn write(&self, tier: &Tier, key: &str, response: &Response, route: &Route) {
        if !response.is_success() {
            debug!(url = %key, status = response.status, "Not caching unsuccessful response");
            return;
        }
        match self.store.put(tier, key, response).await {
            Ok(_) => self.schedule_trim(tier.clone()),
            Err(e) => {
                warn!(url = %key, tier = %tier.name, strategy = %route.strategy, error = %e, "Cache write failed");
            }
        }
    }

    fn schedule_trim(&self, tier: Tier) {
        let eviction = self.eviction.clone();
        self.background.spawn(async move {
            if let Err(e) = eviction.trim(&tier).await {
                warn!(tier = %tier.name, error = %e, "Background trim failed");
            }
        });
    }

    fn spawn_revalidate(&self, request: Request, route: Route, tier: Tier) {
        let executor = self.clone();
        self.background.spawn(async move {
            let key = request.cache_key();
            match executor.fetch(&request, &route).await {
                Ok(response) => executor.write(&tier, &key, &response, &route).await,
                Err(e) => {
                    warn!(url = %key, tier = %tier.name, strategy = %route.strategy, error = %e, "Background revalidation failed");
                }
            }
        });
    }
}

fn newest(a: Option<CacheEntry>, b: Option<CacheEntry>) -> Option<CacheEntry> {
    match (a, b) {
        (Some(a), Some(b)) => Some(if b.stored_at > a.stored_at { b } else { a }),
        (a, b) => a.or(b),
    }
}
