//! Orchestration services
//!
//! Each workflow owns one [`AcmeClient`] for its duration; nothing here keeps
//! protocol state across workflows.

mod authorize;
mod inventory;
mod issue;
mod register;
mod sync;

pub use authorize::{AuthorizeOptions, AuthorizeService};
pub use inventory::{InventoryEntry, InventoryService};
pub use issue::{IssueOptions, IssueOutcome, IssueRequest, IssueService};
pub use register::{RegisterOptions, RegisterService};
pub use sync::{SyncService, SyncedFiles, SYNC_CERT_FILE, SYNC_KEY_FILE};

use std::sync::Arc;

use tracing::debug;

use crate::blob::BlobStore;
use crate::challenge::ChallengeBackends;
use crate::config::AgentConfig;
use crate::error::{AcmeError, StorageError};
use crate::protocol::AcmeClient;
use crate::storage::Store;

/// Shared context of every workflow
pub struct Agent {
    config: AgentConfig,
    blobs: Arc<dyn BlobStore>,
    backends: ChallengeBackends,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("config", &self.config)
            .field("backends", &self.backends)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn new(config: AgentConfig, blobs: Arc<dyn BlobStore>, backends: ChallengeBackends) -> Self {
        Self {
            config,
            blobs,
            backends,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn backends(&self) -> &ChallengeBackends {
        &self.backends
    }

    /// Store scoped to `email` in the configured layout
    pub fn store(&self, email: &str) -> Result<Store, StorageError> {
        Store::new(self.blobs.clone(), self.config.layout, email)
    }

    /// Fresh, uninitialized protocol client
    pub fn new_client(&self) -> Result<AcmeClient, AcmeError> {
        AcmeClient::new(&self.config.directory_url, self.config.client_options())
    }

    /// Protocol client initialized with the account key held in `store`
    pub async fn connect(&self, store: &Store) -> Result<AcmeClient, AcmeError> {
        let mut client = self.new_client()?;
        client.initialize(store).await?;
        debug!(email = %store.email(), directory_url = %self.config.directory_url, "ACME client ready");
        Ok(client)
    }
}
