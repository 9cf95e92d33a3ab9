//! Versioned tier storage.
//!
//! `TierStore` maps logical tiers onto physical namespaces of a
//! [`StorageBackend`], using the namespace scheme from [`crate::tier`].
//! Two backends are provided:
//! - `MemoryBackend`: process-local, used by tests and short-lived tools
//! - `FsBackend`: one directory per namespace under the cache directory

pub mod fs;
pub mod memory;
pub mod traits;

use std::sync::Arc;

use crate::entry::CacheEntry;
use crate::http::Response;
use crate::tier::{namespace_name, parse_namespace, ParsedNamespace, Tier, VersionTag};

pub use fs::FsBackend;
pub use memory::MemoryBackend;
pub use traits::{StorageBackend, StorageError};

/// Tier-addressed view over a storage backend for one build version.
///
/// Clone is cheap: the backend is shared.
#[derive(Clone)]
pub struct TierStore {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
    version: VersionTag,
}

impl TierStore {
    pub fn new(backend: Arc<dyn StorageBackend>, prefix: impl Into<String>, version: VersionTag) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            version,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> &VersionTag {
        &self.version
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Physical namespace backing `tier` for the current version.
    pub fn namespace(&self, tier: &Tier) -> String {
        namespace_name(&self.prefix, &tier.name, &self.version)
    }

    pub async fn get(&self, tier: &Tier, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        self.backend.get(&self.namespace(tier), key).await
    }

    /// Capture `value` under `key`, returning the stored entry.
    pub async fn put(&self, tier: &Tier, key: &str, value: &Response) -> Result<CacheEntry, StorageError> {
        let entry = CacheEntry::capture(key, value);
        self.put_entry(tier, entry.clone()).await?;
        Ok(entry)
    }

    pub async fn put_entry(&self, tier: &Tier, entry: CacheEntry) -> Result<(), StorageError> {
        self.backend.put(&self.namespace(tier), entry).await
    }

    pub async fn delete(&self, tier: &Tier, key: &str) -> Result<bool, StorageError> {
        self.backend.delete(&self.namespace(tier), key).await
    }

    /// Keys of `tier`, oldest insertion first.
    pub async fn keys(&self, tier: &Tier) -> Result<Vec<String>, StorageError> {
        self.backend.keys(&self.namespace(tier)).await
    }

    /// Every namespace created under this store's prefix, at any version.
    pub async fn owned_namespaces(&self) -> Result<Vec<(String, ParsedNamespace)>, StorageError> {
        Ok(self
            .backend
            .namespaces()
            .await?
            .into_iter()
            .filter_map(|name| parse_namespace(&self.prefix, &name).map(|parsed| (name, parsed)))
            .collect())
    }

    /// Delete every namespace owned by this prefix for which `pattern` returns
    /// true. Returns the deleted names.
    pub async fn delete_namespace<F>(&self, pattern: F) -> Result<Vec<String>, StorageError>
    where
        F: Fn(&ParsedNamespace) -> bool,
    {
        let mut deleted = Vec::new();
        for (name, parsed) in self.owned_namespaces().await? {
            if pattern(&parsed) && self.backend.delete_namespace(&name).await? {
                deleted.push(name);
            }
        }
        Ok(deleted)
    }
}
