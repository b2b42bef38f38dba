//! Domain authorization workflow
//!
//! new-authz, select challenge, solve, submit, wait, clean up, re-fetch,
//! persist. Cleanup runs whatever happened in between, including the overall
//! deadline firing.

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::Agent;
use crate::challenge::{find_challenge, ChallengeStrategy, SolveChallenge};
use crate::error::AcmeError;
use crate::key::build_key_authorization;
use crate::protocol::{AcmeClient, Authorization, Status, IDENTIFIER_DNS};
use crate::storage::Store;

#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorizeOptions {
    pub strategy: ChallengeStrategy,
    /// Re-authorize even when a usable authorization is stored
    pub renew: bool,
}

pub struct AuthorizeService<'a> {
    agent: &'a Agent,
}

impl<'a> AuthorizeService<'a> {
    pub fn new(agent: &'a Agent) -> Self {
        Self { agent }
    }

    /// Prove control of `domain`, returning the final authorization
    pub async fn authorize(
        &self,
        client: &mut AcmeClient,
        store: &Store,
        domain: &str,
        options: AuthorizeOptions,
    ) -> Result<Authorization, AcmeError> {
        if !options.renew {
            if let Some(existing) = self.usable_authorization(store, domain).await? {
                info!(
                    domain = %domain,
                    authorization = %existing.url,
                    expires = ?existing.expires,
                    "Authorization is still valid, skipping"
                );
                return Ok(existing);
            }
        }

        info!(domain = %domain, strategy = %options.strategy, "Starting authorization");
        let authz = client.new_authorization(IDENTIFIER_DNS, domain).await?;

        if authz.status == Status::Valid {
            info!(domain = %domain, authorization = %authz.url, "CA reused a valid authorization");
            store.save_authorization(domain, &authz).await?;
            return Ok(authz);
        }

        let challenge = find_challenge(&authz, options.strategy.challenge_type())?;
        let account_key = client.account_key().ok_or(AcmeError::NotInitialized)?;
        let key_authorization = build_key_authorization(&challenge.token, account_key);
        debug!(domain = %domain, challenge = %challenge.uri, "Selected challenge");

        let mut solver = self.agent.backends().solver_for(
            options.strategy,
            domain,
            &challenge,
            self.agent.config(),
        )?;

        let deadline = self.agent.config().authorize_timeout;
        let outcome = tokio::time::timeout(deadline, async {
            solver.solve_challenge(&key_authorization).await?;
            client.submit_challenge(&challenge, &key_authorization).await?;
            client.wait_for_challenge(domain, &challenge).await
        })
        .await
        .unwrap_or_else(|_| {
            Err(AcmeError::Timeout {
                what: format!("authorization of {domain}"),
                timeout: deadline,
                last_status: "unknown".to_string(),
            })
        });

        if let Err(e) = solver.cleanup_challenge(&key_authorization).await {
            error!(domain = %domain, error = %e, "Failed to clean up challenge artifact");
        }

        match &outcome {
            Ok(_) => info!(domain = %domain, "Challenge has been solved"),
            Err(e) => warn!(domain = %domain, error = %e, "Challenge has failed"),
        }
        outcome?;

        let current = client.get_authorization(&authz.url).await?;
        store.save_authorization(domain, &current).await?;

        info!(domain = %domain, status = %current.status, "Authorization completed");
        Ok(current)
    }

    async fn usable_authorization(
        &self,
        store: &Store,
        domain: &str,
    ) -> Result<Option<Authorization>, AcmeError> {
        match store.load_authorization(domain).await {
            Ok(authz) if authz.is_usable(Utc::now()) => Ok(Some(authz)),
            Ok(authz) => {
                info!(
                    domain = %domain,
                    status = %authz.status,
                    expires = ?authz.expires,
                    "Previous authorization is not usable, re-authorization is required"
                );
                Ok(None)
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
