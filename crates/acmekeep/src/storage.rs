//! Persistence of account and per-domain ACME material
//!
//! Maps domain concepts onto [`BlobStore`] keys. Each [`StoreLayout`] fixes
//! both the key prefix and the key encoding, so a store always reads back what
//! its own layout wrote.
//!
//! # Key Layout
//!
//! ```text
//! {prefix}/{email}/
//! ├── info/
//! │   ├── {email}.json          # Registration record
//! │   └── {email}.{jwk|pem}     # Account key
//! └── domain/
//!     └── example.org/
//!         ├── privkey.{jwk|pem} # Certificate key
//!         ├── cert.pem          # Leaf followed by the issuer chain
//!         └── authz.json        # Last terminal authorization
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::blob::BlobStore;
use crate::error::{KeyError, StorageError};
use crate::key::{AccountKey, CertKey};
use crate::protocol::{Authorization, Registration};

const INFO_DIR: &str = "info";
const DOMAIN_DIR: &str = "domain";
const CERT_KEY_NAME: &str = "privkey";
const CERT_FILE: &str = "cert.pem";
const AUTHZ_FILE: &str = "authz.json";

/// Versioned store layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreLayout {
    /// `aaa-data`, keys as JWK
    V1,
    /// `aaa-data/v2`, keys as PKCS#8 PEM
    #[default]
    V2,
}

impl StoreLayout {
    pub fn prefix(&self) -> &'static str {
        match self {
            StoreLayout::V1 => "aaa-data",
            StoreLayout::V2 => "aaa-data/v2",
        }
    }

    /// File extension of stored private keys
    pub fn key_extension(&self) -> &'static str {
        match self {
            StoreLayout::V1 => "jwk",
            StoreLayout::V2 => "pem",
        }
    }

    fn encode_account_key(&self, key: &AccountKey) -> Result<String, KeyError> {
        match self {
            StoreLayout::V1 => Ok(key.to_jwk()),
            StoreLayout::V2 => key.to_pem(),
        }
    }

    fn decode_account_key(&self, data: &str) -> Result<AccountKey, KeyError> {
        match self {
            StoreLayout::V1 => AccountKey::from_jwk(data),
            StoreLayout::V2 => AccountKey::from_pem(data),
        }
    }

    fn encode_cert_key(&self, key: &CertKey) -> Result<String, KeyError> {
        match self {
            StoreLayout::V1 => key.to_jwk(),
            StoreLayout::V2 => Ok(key.pem().to_string()),
        }
    }

    fn decode_cert_key(&self, data: &str) -> Result<CertKey, KeyError> {
        match self {
            StoreLayout::V1 => CertKey::from_jwk(data),
            StoreLayout::V2 => CertKey::from_pem(data),
        }
    }
}

impl fmt::Display for StoreLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLayout::V1 => f.write_str("v1"),
            StoreLayout::V2 => f.write_str("v2"),
        }
    }
}

impl FromStr for StoreLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "v1" => Ok(StoreLayout::V1),
            "v2" => Ok(StoreLayout::V2),
            other => Err(format!("unknown store layout '{other}' (expected v1 or v2)")),
        }
    }
}

/// Emails that have material under `layout`
pub async fn list_accounts(
    blobs: &dyn BlobStore,
    layout: StoreLayout,
) -> Result<Vec<String>, StorageError> {
    // The v2 tree is nested below the v1 prefix
    let nested = match layout {
        StoreLayout::V1 => Some("v2"),
        StoreLayout::V2 => None,
    };

    let accounts = blobs
        .list_dir(layout.prefix())
        .await?
        .iter()
        .map(|key| blobs.split(key).1.to_string())
        .filter(|name| Some(name.as_str()) != nested)
        .collect();

    Ok(accounts)
}

/// Account-scoped view of a blob store
#[derive(Clone)]
pub struct Store {
    blobs: Arc<dyn BlobStore>,
    layout: StoreLayout,
    email: String,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("layout", &self.layout)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl Store {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        layout: StoreLayout,
        email: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let email = email.into();
        if email.trim().is_empty() {
            return Err(StorageError::EmptyEmail);
        }
        validate_segment(&email)?;

        Ok(Self {
            blobs,
            layout,
            email,
        })
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn layout(&self) -> StoreLayout {
        self.layout
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    fn account_dir(&self) -> String {
        self.blobs.join(&[self.layout.prefix(), &self.email])
    }

    fn info_key(&self, file: &str) -> String {
        self.blobs.join(&[&self.account_dir(), INFO_DIR, file])
    }

    fn domain_dir(&self) -> String {
        self.blobs.join(&[&self.account_dir(), DOMAIN_DIR])
    }

    fn domain_key(&self, domain: &str, file: &str) -> Result<String, StorageError> {
        validate_segment(domain)?;
        Ok(self.blobs.join(&[&self.domain_dir(), domain, file]))
    }

    fn registration_key(&self) -> String {
        self.info_key(&format!("{}.json", self.email))
    }

    fn account_key_key(&self) -> String {
        self.info_key(&format!("{}.{}", self.email, self.layout.key_extension()))
    }

    fn cert_key_key(&self, domain: &str) -> Result<String, StorageError> {
        self.domain_key(
            domain,
            &format!("{CERT_KEY_NAME}.{}", self.layout.key_extension()),
        )
    }

    async fn read_string(&self, key: &str) -> Result<String, StorageError> {
        let data = self.blobs.read_file(key).await.inspect_err(|e| {
            if e.is_not_found() {
                trace!(key = %key, "Store miss");
            }
        })?;
        String::from_utf8(data).map_err(|e| StorageError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, StorageError> {
        let data = self.read_string(key).await?;
        serde_json::from_str(&data).map_err(|e| StorageError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    async fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(value)?;
        self.blobs.write_file(key, &data).await
    }

    // =========================================================================
    // Account Operations
    // =========================================================================

    pub async fn save_account(&self, key: &AccountKey) -> Result<(), StorageError> {
        let path = self.account_key_key();
        let encoded = self
            .layout
            .encode_account_key(key)
            .map_err(|e| decode_error(&path, e))?;
        self.blobs.write_file(&path, encoded.as_bytes()).await?;

        info!(email = %self.email, layout = %self.layout, "Saved account key");
        Ok(())
    }

    pub async fn load_account(&self) -> Result<AccountKey, StorageError> {
        let path = self.account_key_key();
        let data = self.read_string(&path).await?;
        let key = self
            .layout
            .decode_account_key(&data)
            .map_err(|e| decode_error(&path, e))?;

        debug!(email = %self.email, thumbprint = %key.thumbprint(), "Loaded account key");
        Ok(key)
    }

    pub async fn save_registration(&self, registration: &Registration) -> Result<(), StorageError> {
        self.write_json(&self.registration_key(), registration).await?;
        info!(
            email = %self.email,
            account_url = %registration.url,
            agreed = registration.agreed,
            "Saved registration"
        );
        Ok(())
    }

    pub async fn load_registration(&self) -> Result<Registration, StorageError> {
        self.read_json(&self.registration_key()).await
    }

    // =========================================================================
    // Domain Operations
    // =========================================================================

    pub async fn save_cert_key(&self, domain: &str, key: &CertKey) -> Result<(), StorageError> {
        let path = self.cert_key_key(domain)?;
        let encoded = self
            .layout
            .encode_cert_key(key)
            .map_err(|e| decode_error(&path, e))?;
        self.blobs.write_file(&path, encoded.as_bytes()).await?;

        debug!(domain = %domain, "Saved certificate key");
        Ok(())
    }

    pub async fn load_cert_key(&self, domain: &str) -> Result<CertKey, StorageError> {
        let path = self.cert_key_key(domain)?;
        let data = self.read_string(&path).await?;
        self.layout
            .decode_cert_key(&data)
            .map_err(|e| decode_error(&path, e))
    }

    /// Store the PEM bundle (leaf first, then issuers)
    pub async fn save_cert(&self, domain: &str, pem: &str) -> Result<(), StorageError> {
        self.blobs
            .write_file(&self.domain_key(domain, CERT_FILE)?, pem.as_bytes())
            .await?;

        info!(domain = %domain, email = %self.email, "Saved certificate");
        Ok(())
    }

    pub async fn load_cert(&self, domain: &str) -> Result<String, StorageError> {
        self.read_string(&self.domain_key(domain, CERT_FILE)?).await
    }

    pub async fn save_authorization(
        &self,
        domain: &str,
        authorization: &Authorization,
    ) -> Result<(), StorageError> {
        self.write_json(&self.domain_key(domain, AUTHZ_FILE)?, authorization)
            .await?;

        debug!(
            domain = %domain,
            status = %authorization.status,
            expires = ?authorization.expires,
            "Saved authorization"
        );
        Ok(())
    }

    pub async fn load_authorization(&self, domain: &str) -> Result<Authorization, StorageError> {
        self.read_json(&self.domain_key(domain, AUTHZ_FILE)?).await
    }

    /// Domains with any stored material; empty when there are none
    pub async fn list_domains(&self) -> Result<Vec<String>, StorageError> {
        let domains = self
            .blobs
            .list_dir(&self.domain_dir())
            .await?
            .iter()
            .map(|key| self.blobs.split(key).1.to_string())
            .collect();

        Ok(domains)
    }
}

/// Emails and domains become key segments; they must not climb or nest
fn validate_segment(name: &str) -> Result<(), StorageError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);

    if invalid {
        return Err(StorageError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn decode_error(key: &str, e: KeyError) -> StorageError {
    StorageError::Decode {
        key: key.to_string(),
        message: e.to_string(),
    }
}
