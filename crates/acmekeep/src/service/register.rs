//! Account registration

use chrono::Utc;
use tracing::{debug, info, warn};

use super::Agent;
use crate::error::AcmeError;
use crate::key::AccountKey;
use crate::protocol::Registration;
use crate::storage::Store;

#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Submit the terms-of-service agreement right away
    pub agree_tos: bool,
    /// Register a new key even when a registration exists
    pub override_existing: bool,
}

pub struct RegisterService<'a> {
    agent: &'a Agent,
}

impl<'a> RegisterService<'a> {
    pub fn new(agent: &'a Agent) -> Self {
        Self { agent }
    }

    /// Create (or reuse) the account of `store.email()`
    pub async fn register(
        &self,
        store: &Store,
        options: &RegisterOptions,
    ) -> Result<Registration, AcmeError> {
        if !options.override_existing {
            match store.load_registration().await {
                Ok(registration) => {
                    info!(
                        email = %store.email(),
                        account_url = %registration.url,
                        "Registration already exists, skipping"
                    );
                    return Ok(registration);
                }
                Err(e) if e.is_not_found() => {
                    debug!(email = %store.email(), "No registration yet");
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Persisted only once the CA has accepted it
        let key = AccountKey::generate();

        let mut client = self.agent.new_client()?;
        client.initialize_with_key(key.clone()).await?;

        let contacts = vec![format!("mailto:{}", store.email())];
        let new_registration = client.register(&contacts).await?;

        let agreed = if options.agree_tos {
            client
                .update_registration(
                    &new_registration.url,
                    Some(&new_registration.terms_of_service),
                    &contacts,
                )
                .await?;
            info!(terms_of_service = %new_registration.terms_of_service, "Agreed to the terms of service");
            true
        } else {
            warn!(
                terms_of_service = %new_registration.terms_of_service,
                "Terms of service not agreed; re-run with --agree-tos after reviewing them"
            );
            false
        };

        let registration = Registration {
            email: store.email().to_string(),
            url: new_registration.url,
            terms_of_service: new_registration.terms_of_service,
            agreed,
            contacts,
            created: Utc::now(),
        };
        store.save_account(&key).await?;
        store.save_registration(&registration).await?;

        Ok(registration)
    }
}
