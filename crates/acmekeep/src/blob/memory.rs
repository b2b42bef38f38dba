//! In-memory blob store for tests and dry runs.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{join_key, BlobStore, SEPARATOR};
use crate::error::StorageError;

/// Concurrent map from full key to contents
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn write_file(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.blobs.insert(join_key(&[key]), data.to_vec());
        Ok(())
    }

    async fn read_file(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.blobs
            .get(&join_key(&[key]))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn list_dir(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let prefix = join_key(&[prefix]);
        let children: BTreeSet<String> = self
            .blobs
            .iter()
            .filter_map(|entry| {
                let rest = if prefix.is_empty() {
                    entry.key().as_str()
                } else {
                    entry.key().strip_prefix(&prefix)?.strip_prefix(SEPARATOR)?
                };
                let child = rest.split(SEPARATOR).next()?;
                Some(join_key(&[&prefix, child]))
            })
            .collect();

        Ok(children.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_dir_returns_immediate_children() {
        let store = MemoryBlobStore::new();
        store.write_file("aaa-data/a@x.org/info/a@x.org.json", b"{}").await.unwrap();
        store.write_file("aaa-data/a@x.org/domain/x.org/cert.pem", b"c").await.unwrap();
        store.write_file("aaa-data/b@x.org/info/b@x.org.json", b"{}").await.unwrap();
        store.write_file("aaa-data-other/z", b"z").await.unwrap();

        assert_eq!(
            store.list_dir("aaa-data").await.unwrap(),
            vec!["aaa-data/a@x.org", "aaa-data/b@x.org"]
        );
        assert_eq!(
            store.list_dir("aaa-data/a@x.org/").await.unwrap(),
            vec!["aaa-data/a@x.org/domain", "aaa-data/a@x.org/info"]
        );
        assert!(store.list_dir("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_missing() {
        let store = MemoryBlobStore::new();
        assert!(store.read_file("k").await.unwrap_err().is_not_found());

        store.write_file("k", b"v").await.unwrap();
        assert_eq!(store.read_file("k").await.unwrap(), b"v");
        assert_eq!(store.len(), 1);
    }
}
