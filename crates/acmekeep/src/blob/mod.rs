//! Hierarchical key/value blob storage
//!
//! The persistence layer only depends on [`BlobStore`]. Keys are `/`-separated
//! paths; "directories" exist implicitly as key prefixes.

mod fs;
mod memory;

pub use fs::FsBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;

use crate::error::StorageError;

/// Separator used by every backend shipped here
pub const SEPARATOR: char = '/';

/// Content store addressed by hierarchical keys
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create or replace the blob at `key`.
    async fn write_file(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Read the blob at `key`; a missing key is [`StorageError::NotFound`].
    async fn read_file(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Full keys of the immediate children of `prefix`, sorted.
    ///
    /// A prefix with no children (or that never existed) yields an empty list.
    async fn list_dir(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Join path segments with the backend separator, skipping empty ones
    fn join(&self, parts: &[&str]) -> String {
        join_key(parts)
    }

    /// Split a key into `(parent, last segment)`
    fn split<'a>(&self, key: &'a str) -> (&'a str, &'a str) {
        split_key(key)
    }
}

pub(crate) fn join_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for part in parts {
        let part = part.trim_matches(SEPARATOR);
        if part.is_empty() {
            continue;
        }
        if !key.is_empty() {
            key.push(SEPARATOR);
        }
        key.push_str(part);
    }
    key
}

pub(crate) fn split_key(key: &str) -> (&str, &str) {
    let key = key.trim_end_matches(SEPARATOR);
    match key.rfind(SEPARATOR) {
        Some(idx) => (&key[..idx], &key[idx + 1..]),
        None => ("", key),
    }
}
