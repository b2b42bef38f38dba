//! HTTP-01 through a public object-storage bucket
//!
//! The bucket is expected to be served at `http://<domain>/`, so an object at
//! `.well-known/acme-challenge/<token>` answers the CA's fetch.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{well_known_path, SolveChallenge};
use crate::error::{AcmeError, StorageError};

/// Bucket operations needed by [`BucketSolver`]
#[async_trait]
pub trait PublicBucket: Send + Sync {
    /// Upload `body` at `key` with a public-read ACL
    async fn put_public_object(&self, key: &str, body: &[u8]) -> Result<(), StorageError>;

    /// Delete `key`; deleting a missing object succeeds
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;
}

pub struct BucketSolver {
    bucket: Arc<dyn PublicBucket>,
    domain: String,
    token: String,
}

impl std::fmt::Debug for BucketSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketSolver")
            .field("domain", &self.domain)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl BucketSolver {
    pub fn new(bucket: Arc<dyn PublicBucket>, domain: &str, token: &str) -> Self {
        Self {
            bucket,
            domain: domain.to_string(),
            token: token.to_string(),
        }
    }

    /// Object key, without the leading slash of the URL path
    pub fn object_key(&self) -> String {
        well_known_path(&self.token)
            .trim_start_matches('/')
            .to_string()
    }
}

#[async_trait]
impl SolveChallenge for BucketSolver {
    async fn solve_challenge(&mut self, key_authorization: &str) -> Result<(), AcmeError> {
        let key = self.object_key();
        self.bucket
            .put_public_object(&key, key_authorization.as_bytes())
            .await?;

        info!(domain = %self.domain, key = %key, "HTTP challenge object uploaded");
        Ok(())
    }

    async fn cleanup_challenge(&mut self, _key_authorization: &str) -> Result<(), AcmeError> {
        let key = self.object_key();
        self.bucket.delete_object(&key).await?;

        debug!(domain = %self.domain, key = %key, "HTTP challenge object deleted");
        Ok(())
    }
}
