//! Certificate inventory across all accounts (`ls`)

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::blob::BlobStore;
use crate::certificate::CertificateInfo;
use crate::error::AcmeError;
use crate::storage::{list_accounts, Store, StoreLayout};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InventoryEntry {
    /// Account the certificate is stored under
    pub email: String,
    pub domain: String,
    pub certificate: CertificateInfo,
}

impl InventoryEntry {
    pub fn needs_renewal(&self, now: DateTime<Utc>, horizon: chrono::Duration) -> bool {
        self.certificate.needs_renewal(now, horizon)
    }
}

pub struct InventoryService {
    blobs: Arc<dyn BlobStore>,
    layout: StoreLayout,
}

impl InventoryService {
    pub fn new(blobs: Arc<dyn BlobStore>, layout: StoreLayout) -> Self {
        Self { blobs, layout }
    }

    /// Every stored certificate; domains without a readable one are skipped
    pub async fn list(&self) -> Result<Vec<InventoryEntry>, AcmeError> {
        let mut entries = Vec::new();

        for email in list_accounts(self.blobs.as_ref(), self.layout).await? {
            let store = Store::new(self.blobs.clone(), self.layout, email.as_str())?;

            for domain in store.list_domains().await? {
                let pem = match store.load_cert(&domain).await {
                    Ok(pem) => pem,
                    Err(e) if e.is_not_found() => {
                        debug!(email = %email, domain = %domain, "No certificate stored, skipping");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                match CertificateInfo::from_pem(&pem) {
                    Ok(certificate) => entries.push(InventoryEntry {
                        email: email.clone(),
                        domain,
                        certificate,
                    }),
                    Err(e) => {
                        warn!(email = %email, domain = %domain, error = %e, "Skipping unreadable certificate");
                    }
                }
            }
        }

        Ok(entries)
    }
}
