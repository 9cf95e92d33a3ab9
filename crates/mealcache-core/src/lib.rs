//! mealcache core - a client-side request interception and caching layer.
//!
//! Every outgoing request is classified, served through a per-class caching
//! strategy backed by versioned, size-bounded tiers, and answered with a
//! synthesized offline response when neither the network nor the cache can
//! help. Deferred work queued while offline is redelivered by tag once
//! connectivity returns.
//!
//! Most callers only need [`CacheLayer`]:
//!
//! ```no_run
//! # async fn run() -> anyhow::Result<()> {
//! use std::sync::Arc;
//! use mealcache_core::{CacheConfig, CacheLayer, HttpFetcher, MemoryBackend, Request};
//!
//! let mut config = CacheConfig::default();
//! config.origin = Some("https://meals.example".to_string());
//!
//! let layer = CacheLayer::new(config, Arc::new(MemoryBackend::new()), Arc::new(HttpFetcher::new()?))?;
//! layer.lifecycle().startup().await?;
//!
//! let response = layer.handle(&Request::get("https://meals.example/api/plan".parse()?)).await;
//! println!("{} from {}", response.status, response.source);
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod clients;
pub mod config;
pub mod entry;
pub mod eviction;
pub mod executor;
pub mod fallback;
pub mod fetch;
pub mod http;
pub mod layer;
pub mod lifecycle;
pub mod retry;
pub mod store;
pub mod sync;
pub mod tier;

pub use classifier::{Classification, ClassifierError, RequestClass, RequestClassifier, Route, Strategy};
pub use clients::{ClientId, ClientRegistry};
pub use config::{CacheConfig, SyncConfig};
pub use entry::CacheEntry;
pub use eviction::EvictionManager;
pub use executor::StrategyExecutor;
pub use fallback::{FallbackKind, FallbackSynthesizer};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use http::{Request, Response, ResponseSource, SOURCE_HEADER};
pub use layer::{CacheLayer, CacheStatus, TierStatus};
pub use lifecycle::{ActivationReport, LifecycleCoordinator, LifecycleError, LifecyclePhase};
pub use retry::RetryConfig;
pub use store::{FsBackend, MemoryBackend, StorageBackend, StorageError, TierStore};
pub use sync::{DispatchOutcome, DrainReport, SyncError, SyncHandler, SyncQueue, SyncTaskDispatcher};
pub use tier::{Tier, TierSet, VersionTag, VersionTagError};
