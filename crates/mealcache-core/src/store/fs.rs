//! Filesystem backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<namespace>/index.json   ordered key list + next sequence number
//! <root>/<namespace>/<seq>.json   one serialized CacheEntry per file
//! ```
//!
//! The index is rewritten through a temp file and rename, so a crash leaves
//! either the old or the new index. An entry file written just before a
//! crash may have no index record; `get` and `keys` never see it, and it stays
//! on disk until its namespace is deleted.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::traits::{StorageBackend, StorageError};
use crate::entry::CacheEntry;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    next_seq: u64,
    records: Vec<IndexRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexRecord {
    key: String,
    seq: u64,
}

impl Index {
    fn position(&self, key: &str) -> Option<usize> {
        self.records.iter().position(|r| r.key == key)
    }
}

pub struct FsBackend {
    root: PathBuf,
    // Serializes index read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            namespace: root.display().to_string(),
            source,
        })?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> Result<PathBuf, StorageError> {
        let valid = !namespace.is_empty()
            && namespace != "."
            && namespace != ".."
            && !namespace.contains(|c: char| c == '/' || c == '\\');
        if !valid {
            return Err(StorageError::Backend(format!(
                "invalid namespace name: {:?}",
                namespace
            )));
        }
        Ok(self.root.join(namespace))
    }

    fn entry_path(dir: &Path, seq: u64) -> PathBuf {
        dir.join(format!("{}.json", seq))
    }

    async fn load_index(&self, namespace: &str, dir: &Path) -> Result<Index, StorageError> {
        match tokio::fs::read(dir.join(INDEX_FILE)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                namespace: namespace.to_string(),
                reason: format!("index: {}", e),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Index::default()),
            Err(source) => Err(io_error(namespace, source)),
        }
    }

    async fn save_index(&self, namespace: &str, dir: &Path, index: &Index) -> Result<(), StorageError> {
        let contents = serde_json::to_vec(index).map_err(|e| StorageError::Corrupt {
            namespace: namespace.to_string(),
            reason: format!("index: {}", e),
        })?;
        let tmp = dir.join(format!("{}.tmp", INDEX_FILE));
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| io_error(namespace, e))?;
        tokio::fs::rename(&tmp, dir.join(INDEX_FILE))
            .await
            .map_err(|e| io_error(namespace, e))
    }

    async fn remove_entry_file(&self, namespace: &str, dir: &Path, seq: u64) -> Result<(), StorageError> {
        match tokio::fs::remove_file(Self::entry_path(dir, seq)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(io_error(namespace, source)),
        }
    }
}

fn io_error(namespace: &str, source: std::io::Error) -> StorageError {
    StorageError::Io {
        namespace: namespace.to_string(),
        source,
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>, StorageError> {
        let dir = self.namespace_dir(namespace)?;
        let _guard = self.lock.lock().await;

        let index = self.load_index(namespace, &dir).await?;
        let Some(pos) = index.position(key) else {
            return Ok(None);
        };

        let path = Self::entry_path(&dir, index.records[pos].seq);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(namespace, key, "Index references missing entry file");
                return Ok(None);
            }
            Err(source) => return Err(io_error(namespace, source)),
        };
        let entry = serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
            namespace: namespace.to_string(),
            reason: format!("entry {}: {}", key, e),
        })?;
        Ok(Some(entry))
    }

    async fn put(&self, namespace: &str, entry: CacheEntry) -> Result<(), StorageError> {
        let dir = self.namespace_dir(namespace)?;
        let _guard = self.lock.lock().await;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(namespace, e))?;
        let mut index = self.load_index(namespace, &dir).await?;

        let seq = index.next_seq;
        index.next_seq += 1;

        let contents = serde_json::to_vec(&entry).map_err(|e| StorageError::Corrupt {
            namespace: namespace.to_string(),
            reason: format!("entry {}: {}", entry.key, e),
        })?;
        tokio::fs::write(Self::entry_path(&dir, seq), contents)
            .await
            .map_err(|e| io_error(namespace, e))?;

        let replaced = index.position(&entry.key).map(|pos| index.records.remove(pos));
        index.records.push(IndexRecord {
            key: entry.key,
            seq,
        });
        self.save_index(namespace, &dir, &index).await?;

        if let Some(old) = replaced {
            self.remove_entry_file(namespace, &dir, old.seq).await?;
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool, StorageError> {
        let dir = self.namespace_dir(namespace)?;
        let _guard = self.lock.lock().await;

        let mut index = self.load_index(namespace, &dir).await?;
        let Some(pos) = index.position(key) else {
            return Ok(false);
        };
        let record = index.records.remove(pos);
        self.save_index(namespace, &dir, &index).await?;
        self.remove_entry_file(namespace, &dir, record.seq).await?;
        Ok(true)
    }

    async fn keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.namespace_dir(namespace)?;
        let _guard = self.lock.lock().await;

        let index = self.load_index(namespace, &dir).await?;
        Ok(index.records.into_iter().map(|r| r.key).collect())
    }

    async fn namespaces(&self) -> Result<Vec<String>, StorageError> {
        let _guard = self.lock.lock().await;
        let root = self.root.display().to_string();

        let mut dir = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| io_error(&root, e))?;
        let mut names = Vec::new();
        while let Some(item) = dir.next_entry().await.map_err(|e| io_error(&root, e))? {
            let is_dir = item
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if let (true, Some(name)) = (is_dir, item.file_name().to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool, StorageError> {
        let dir = self.namespace_dir(namespace)?;
        let _guard = self.lock.lock().await;

        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(io_error(namespace, source)),
        }
    }
}
