//! Certificate issuance workflow

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{Agent, AuthorizeOptions, AuthorizeService};
use crate::certificate::CertificateInfo;
use crate::challenge::ChallengeStrategy;
use crate::error::AcmeError;
use crate::key::{create_certificate_request, CertKey};
use crate::protocol::AcmeClient;
use crate::storage::Store;

/// What to put in the certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub common_name: String,
    /// Extra subject alternative names
    pub sans: Vec<String>,
}

impl IssueRequest {
    pub fn new(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            sans: Vec::new(),
        }
    }

    pub fn with_sans(mut self, sans: Vec<String>) -> Self {
        self.sans = sans;
        self
    }

    /// Common Name first, then SANs, without duplicates
    pub fn names(&self) -> Vec<String> {
        let mut names = vec![self.common_name.clone()];
        for san in &self.sans {
            if !names.contains(san) {
                names.push(san.clone());
            }
        }
        names
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IssueOptions {
    pub strategy: ChallengeStrategy,
    /// Issue even when the stored certificate is outside the renewal horizon
    pub force: bool,
    /// Sign the CSR with the stored certificate key instead of a new one
    pub reuse_key: bool,
    /// Re-authorize names that have a usable stored authorization
    pub renew_authorizations: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    /// A new certificate was stored
    Issued(CertificateInfo),
    /// The stored certificate does not need renewal yet
    Skipped(CertificateInfo),
}

impl IssueOutcome {
    pub fn info(&self) -> &CertificateInfo {
        match self {
            IssueOutcome::Issued(info) | IssueOutcome::Skipped(info) => info,
        }
    }
}

pub struct IssueService<'a> {
    agent: &'a Agent,
}

impl<'a> IssueService<'a> {
    pub fn new(agent: &'a Agent) -> Self {
        Self { agent }
    }

    pub async fn issue(
        &self,
        client: &mut AcmeClient,
        store: &Store,
        request: &IssueRequest,
        options: IssueOptions,
    ) -> Result<IssueOutcome, AcmeError> {
        let common_name = request.common_name.as_str();

        if !options.force {
            if let Some(current) = self.current_certificate(store, common_name).await? {
                if !current.needs_renewal(Utc::now(), self.agent.config().renew_before()) {
                    info!(
                        domain = %common_name,
                        not_after = %current.not_after,
                        "Certificate is not due for renewal, skipping"
                    );
                    return Ok(IssueOutcome::Skipped(current));
                }
                info!(domain = %common_name, not_after = %current.not_after, "Certificate is due for renewal");
            }
        }

        let authorizer = AuthorizeService::new(self.agent);
        for name in request.names() {
            authorizer
                .authorize(
                    client,
                    store,
                    &name,
                    AuthorizeOptions {
                        strategy: options.strategy,
                        renew: options.renew_authorizations,
                    },
                )
                .await?;
        }

        let key = self.certificate_key(store, common_name, options.reuse_key).await?;
        let csr = create_certificate_request(&key, common_name, &request.sans)?;

        let location = client.request_certificate(&csr).await?;
        let issued = client.fetch_certificate(&location).await?;
        let pem = issued.to_pem();
        let info = CertificateInfo::from_pem(&pem)?;

        store.save_cert_key(common_name, &key).await?;
        store.save_cert(common_name, &pem).await?;

        info!(
            domain = %common_name,
            not_after = %info.not_after,
            san = ?info.san,
            chain_len = issued.chain.len(),
            "Certificate issued"
        );
        Ok(IssueOutcome::Issued(info))
    }

    async fn current_certificate(
        &self,
        store: &Store,
        common_name: &str,
    ) -> Result<Option<CertificateInfo>, AcmeError> {
        match store.load_cert(common_name).await {
            Ok(pem) => match CertificateInfo::from_pem(&pem) {
                Ok(info) => Ok(Some(info)),
                Err(e) => {
                    warn!(domain = %common_name, error = %e, "Stored certificate is unreadable, reissuing");
                    Ok(None)
                }
            },
            Err(e) if e.is_not_found() => {
                debug!(domain = %common_name, "No certificate yet");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn certificate_key(
        &self,
        store: &Store,
        common_name: &str,
        reuse: bool,
    ) -> Result<CertKey, AcmeError> {
        if reuse {
            match store.load_cert_key(common_name).await {
                Ok(key) => {
                    debug!(domain = %common_name, "Reusing stored certificate key");
                    return Ok(key);
                }
                Err(e) if e.is_not_found() => {
                    debug!(domain = %common_name, "No stored certificate key to reuse");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(CertKey::generate()?)
    }
}
