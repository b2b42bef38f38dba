//! DNS-01 through the DNS provider

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::SolveChallenge;
use crate::dns::Route53Provider;
use crate::error::AcmeError;
use crate::key::dns_challenge_value;

#[derive(Debug)]
pub struct DnsSolver {
    provider: Arc<Route53Provider>,
    domain: String,
    /// Set once a change was submitted; cleanup is a no-op otherwise
    provisioned: bool,
}

impl DnsSolver {
    pub fn new(provider: Arc<Route53Provider>, domain: &str) -> Self {
        Self {
            provider,
            domain: domain.to_string(),
            provisioned: false,
        }
    }
}

#[async_trait]
impl SolveChallenge for DnsSolver {
    async fn solve_challenge(&mut self, key_authorization: &str) -> Result<(), AcmeError> {
        let value = dns_challenge_value(key_authorization);

        // Marked before the call: a propagation timeout still leaves the record behind
        self.provisioned = true;
        self.provider.update(&self.domain, &value).await?;

        info!(domain = %self.domain, value = %value, "DNS challenge response deployed");
        Ok(())
    }

    async fn cleanup_challenge(&mut self, key_authorization: &str) -> Result<(), AcmeError> {
        if !self.provisioned {
            debug!(domain = %self.domain, "No DNS challenge record to remove");
            return Ok(());
        }

        let value = dns_challenge_value(key_authorization);
        self.provider.remove(&self.domain, &value).await?;
        self.provisioned = false;

        info!(domain = %self.domain, "DNS challenge record removed");
        Ok(())
    }
}
