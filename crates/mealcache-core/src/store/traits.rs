use async_trait::async_trait;
use thiserror::Error;

use crate::entry::CacheEntry;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error in namespace '{namespace}': {source}")]
    Io {
        namespace: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt data in namespace '{namespace}': {reason}")]
    Corrupt { namespace: String, reason: String },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Durable key-value persistence partitioned into named namespaces.
///
/// Each individual operation is atomic. Sequences of operations are not:
/// callers must tolerate interleaving with concurrent writers.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, StorageError>;

    /// Store an entry under `entry.key`. Overwriting an existing key moves it
    /// to the end of the insertion order.
    async fn put(&self, namespace: &str, entry: CacheEntry) -> Result<(), StorageError>;

    /// Returns true if the key existed.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError>;

    /// Keys of a namespace, oldest insertion first. Missing namespaces are empty.
    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

    /// Names of every namespace currently present.
    async fn namespaces(&self) -> Result<Vec<String>, StorageError>;

    /// Returns true if the namespace existed.
    async fn delete_namespace(&self, namespace: &str) -> Result<bool, StorageError>;
}
