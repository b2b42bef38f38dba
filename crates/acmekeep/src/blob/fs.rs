//! Local filesystem backend
//!
//! Keys map to paths below `base_dir`. Directories are created `0700` and
//! files written `0600` since the store holds private keys.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, trace};

use super::{join_key, BlobStore};
use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    base_dir: PathBuf,
}

impl FsBlobStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split(super::SEPARATOR)
            .filter(|s| !s.is_empty())
            .fold(self.base_dir.clone(), |path, segment| path.join(segment))
    }
}

fn io_error(key: &str, source: std::io::Error) -> StorageError {
    if source.kind() == ErrorKind::NotFound {
        StorageError::NotFound {
            key: key.to_string(),
        }
    } else {
        StorageError::Io {
            key: key.to_string(),
            source,
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn write_file(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);

        if let Some(parent) = path.parent() {
            let mut builder = fs::DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            builder.mode(0o700);
            builder
                .create(parent)
                .await
                .map_err(|e| io_error(key, e))?;
        }

        fs::write(&path, data).await.map_err(|e| io_error(key, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| io_error(key, e))?;
        }

        debug!(key = %key, path = %path.display(), bytes = data.len(), "Wrote blob");
        Ok(())
    }

    async fn read_file(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key);
        let data = fs::read(&path).await.map_err(|e| io_error(key, e))?;
        trace!(key = %key, bytes = data.len(), "Read blob");
        Ok(data)
    }

    async fn list_dir(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let path = self.path_for(prefix);

        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                trace!(prefix = %prefix, "Listing a missing prefix");
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_error(prefix, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(prefix, e))? {
            if let Some(name) = entry.file_name().to_str() {
                keys.push(join_key(&[prefix, name]));
            }
        }
        keys.sort();
        Ok(keys)
    }
}
