use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::traits::{StorageBackend, StorageError};
use crate::entry::CacheEntry;

#[derive(Default)]
struct Namespace {
    order: Vec<String>,
    entries: HashMap<String, CacheEntry>,
}

/// Process-local backend. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryBackend {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across every namespace
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces
            .read()
            .map(|ns| ns.values().map(|n| n.entries.len()).sum())
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StorageError {
    StorageError::Backend("memory backend lock poisoned".to_string())
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let guard = self.namespaces.read().map_err(|_| poisoned())?;
        Ok(guard
            .get(namespace)
            .and_then(|ns| ns.entries.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &str, entry: CacheEntry) -> Result<(), StorageError> {
        let mut guard = self.namespaces.write().map_err(|_| poisoned())?;
        let ns = guard.entry(namespace.to_string()).or_default();
        if ns.entries.contains_key(&entry.key) {
            ns.order.retain(|k| k != &entry.key);
        }
        ns.order.push(entry.key.clone());
        ns.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        let mut guard = self.namespaces.write().map_err(|_| poisoned())?;
        let Some(ns) = guard.get_mut(namespace) else {
            return Ok(false);
        };
        if ns.entries.remove(key).is_some() {
            ns.order.retain(|k| k != key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let guard = self.namespaces.read().map_err(|_| poisoned())?;
        Ok(guard
            .get(namespace)
            .map(|ns| ns.order.clone())
            .unwrap_or_default())
    }

    async fn namespaces(&self) -> Result<Vec<String>, StorageError> {
        let guard = self.namespaces.read().map_err(|_| poisoned())?;
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool, StorageError> {
        let mut guard = self.namespaces.write().map_err(|_| poisoned())?;
        Ok(guard.remove(namespace).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Response;

    fn entry(key: &str) -> CacheEntry {
        CacheEntry::capture(key, &Response::new(200, key.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn test_new_backend_is_empty() {
        let backend = MemoryBackend::new();
        assert!(backend.is_empty());
        assert!(backend.keys("ns").await.unwrap().is_empty());
        assert!(backend.namespaces().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let backend = MemoryBackend::new();
        let e = entry("a");
        backend.put("ns", e.clone()).await.unwrap();
        assert_eq!(backend.get("ns", "a").await.unwrap(), Some(e));
        assert_eq!(backend.get("other", "a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_moves_key_to_end() {
        let backend = MemoryBackend::new();
        for k in ["a", "b", "c"] {
            backend.put("ns", entry(k)).await.unwrap();
        }
        backend.put("ns", entry("a")).await.unwrap();
        assert_eq!(backend.keys("ns").await.unwrap(), vec!["b", "c", "a"]);
        assert_eq!(backend.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_and_delete_namespace() {
        let backend = MemoryBackend::new();
        backend.put("ns", entry("a")).await.unwrap();
        backend.put("ns", entry("b")).await.unwrap();

        assert!(backend.delete("ns", "a").await.unwrap());
        assert!(!backend.delete("ns", "a").await.unwrap());
        assert!(!backend.delete("missing", "a").await.unwrap());
        assert_eq!(backend.keys("ns").await.unwrap(), vec!["b"]);

        assert!(backend.delete_namespace("ns").await.unwrap());
        assert!(!backend.delete_namespace("ns").await.unwrap());
        assert!(backend.is_empty());
    }
}
