//! ACME protocol client
//!
//! One client instance owns one replay-nonce slot. Every response, error
//! responses included, overwrites the slot with its `Replay-Nonce` header, and
//! every signed request uses whatever the slot holds, so requests on one client
//! are strictly sequential (`&mut self` everywhere).

use std::collections::HashSet;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::jws::sign_request;
use super::link::find_link;
use super::{Authorization, Challenge, Directory, IssuedCertificate, Status};
use crate::error::{AcmeError, ProblemDetails};
use crate::key::AccountKey;
use crate::poll::{PollPolicy, Poller};
use crate::storage::Store;

/// Response header carrying the next anti-replay nonce
pub const REPLAY_NONCE_HEADER: &str = "Replay-Nonce";

const JOSE_CONTENT_TYPE: &str = "application/jose+json";

/// Upper bound on `rel="up"` hops when collecting the issuer chain
const MAX_ISSUER_DEPTH: usize = 4;

/// Tunables for one client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Challenge status polling
    pub challenge_poll: PollPolicy,
    /// Certificate readiness polling
    pub certificate_poll: PollPolicy,
    /// Per-request timeout for the underlying HTTP client
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            challenge_poll: PollPolicy::challenge(),
            certificate_poll: PollPolicy::certificate(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Result of `new-reg`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRegistration {
    /// Account URL from `Location`
    pub url: String,
    /// Terms of service from `Link: <...>;rel="terms-of-service"`
    pub terms_of_service: String,
}

/// A fully read HTTP response
#[derive(Debug)]
struct RawResponse {
    url: String,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl RawResponse {
    fn is_error(&self) -> bool {
        self.status.as_u16() > 299
    }

    fn problem(&self) -> ProblemDetails {
        let mut problem =
            serde_json::from_slice::<ProblemDetails>(&self.body).unwrap_or_else(|_| ProblemDetails {
                status: 0,
                kind: String::new(),
                detail: String::from_utf8_lossy(&self.body).into_owned(),
            });
        problem.status = self.status.as_u16();
        problem
    }

    fn into_protocol_error(self) -> AcmeError {
        AcmeError::Protocol {
            problem: self.problem(),
            url: self.url,
        }
    }

    /// Fail with the CA's problem document on status > 299
    fn error_for_status(self) -> Result<Self, AcmeError> {
        if self.is_error() {
            Err(self.into_protocol_error())
        } else {
            Ok(self)
        }
    }

    fn json<T: DeserializeOwned>(&self) -> Result<T, AcmeError> {
        serde_json::from_slice(&self.body).map_err(|e| AcmeError::InvalidResponse {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }

    fn location(&self) -> Option<String> {
        self.headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

/// ACME client bound to one directory and one account key
pub struct AcmeClient {
    http: reqwest::Client,
    directory_url: String,
    options: ClientOptions,
    account_key: Option<AccountKey>,
    directory: Option<Directory>,
    nonce: Option<String>,
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("directory_url", &self.directory_url)
            .field("initialized", &self.directory.is_some())
            .field("nonce", &self.nonce)
            .finish()
    }
}

impl AcmeClient {
    /// Create a client; nothing is fetched until [`initialize`](Self::initialize)
    pub fn new(directory_url: impl Into<String>, options: ClientOptions) -> Result<Self, AcmeError> {
        let directory_url = directory_url.into();
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .user_agent(concat!("acmekeep/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| AcmeError::Transport {
                url: directory_url.clone(),
                source,
            })?;

        Ok(Self {
            http,
            directory_url,
            options,
            account_key: None,
            directory: None,
            nonce: None,
        })
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    /// Nonce that the next signed request will carry
    pub fn nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    pub fn directory(&self) -> Option<&Directory> {
        self.directory.as_ref()
    }

    pub fn account_key(&self) -> Option<&AccountKey> {
        self.account_key.as_ref()
    }

    /// Load the account key from `store`, fetch the directory and the first nonce
    pub async fn initialize(&mut self, store: &Store) -> Result<(), AcmeError> {
        let key = store.load_account().await?;
        self.initialize_with_key(key).await
    }

    /// Same as [`initialize`](Self::initialize) with a key already in hand
    pub async fn initialize_with_key(&mut self, key: AccountKey) -> Result<(), AcmeError> {
        self.account_key = Some(key);

        let url = self.directory_url.clone();
        let response = self.get(&url).await?.error_for_status()?;
        let directory: Directory = response.json()?;

        debug!(
            directory_url = %self.directory_url,
            new_reg = %directory.new_reg,
            new_authz = %directory.new_authz,
            new_cert = %directory.new_cert,
            "Fetched ACME directory"
        );
        self.directory = Some(directory);
        Ok(())
    }

    /// `new-reg`: create the account for `contacts`
    pub async fn register(&mut self, contacts: &[String]) -> Result<NewRegistration, AcmeError> {
        #[derive(Serialize)]
        struct NewReg<'a> {
            contact: &'a [String],
        }

        let url = self.require_directory()?.new_reg.clone();
        let response = self
            .post_signed(&url, "new-reg", &NewReg { contact: contacts })
            .await?
            .error_for_status()?;

        let tos = find_link(&response.headers, "terms-of-service")
            .ok_or(AcmeError::NoTermsOfServiceFound)?;
        let account_url = response.location().ok_or_else(|| AcmeError::InvalidResponse {
            url: url.clone(),
            message: "registration response has no Location header".to_string(),
        })?;

        info!(account_url = %account_url, terms_of_service = %tos.uri, "Registered ACME account");
        Ok(NewRegistration {
            url: account_url,
            terms_of_service: tos.uri,
        })
    }

    /// `reg`: update contacts and record the terms-of-service agreement
    pub async fn update_registration(
        &mut self,
        account_url: &str,
        agreement: Option<&str>,
        contacts: &[String],
    ) -> Result<(), AcmeError> {
        #[derive(Serialize)]
        struct UpdateReg<'a> {
            contact: &'a [String],
            #[serde(skip_serializing_if = "Option::is_none")]
            agreement: Option<&'a str>,
        }

        self.post_signed(
            account_url,
            "reg",
            &UpdateReg {
                contact: contacts,
                agreement,
            },
        )
        .await?
        .error_for_status()?;

        debug!(account_url = %account_url, agreed = agreement.is_some(), "Updated ACME registration");
        Ok(())
    }

    /// `new-authz`: start validating `identifier_value`
    pub async fn new_authorization(
        &mut self,
        identifier_type: &str,
        identifier_value: &str,
    ) -> Result<Authorization, AcmeError> {
        #[derive(Serialize)]
        struct Identifier<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
            value: &'a str,
        }
        #[derive(Serialize)]
        struct NewAuthz<'a> {
            identifier: Identifier<'a>,
        }

        let url = self.require_directory()?.new_authz.clone();
        let response = self
            .post_signed(
                &url,
                "new-authz",
                &NewAuthz {
                    identifier: Identifier {
                        kind: identifier_type,
                        value: identifier_value,
                    },
                },
            )
            .await?
            .error_for_status()?;

        let mut authz: Authorization = response.json()?;
        authz.url = response.location().ok_or_else(|| AcmeError::InvalidResponse {
            url: url.clone(),
            message: "new-authz response has no Location header".to_string(),
        })?;

        info!(
            domain = %identifier_value,
            authorization = %authz.url,
            status = %authz.status,
            challenges = authz.challenges.len(),
            "Created authorization"
        );
        Ok(authz)
    }

    /// Re-fetch the current state of an authorization
    pub async fn get_authorization(&mut self, url: &str) -> Result<Authorization, AcmeError> {
        let response = self.get(url).await?.error_for_status()?;
        let mut authz: Authorization = response.json()?;
        authz.url = url.to_string();
        Ok(authz)
    }

    /// Tell the CA the challenge is ready by posting the key authorization
    ///
    /// Only `202 Accepted` counts as success.
    pub async fn submit_challenge(
        &mut self,
        challenge: &Challenge,
        key_authorization: &str,
    ) -> Result<(), AcmeError> {
        #[derive(Serialize)]
        struct ChallengeResponse<'a> {
            #[serde(rename = "type")]
            kind: &'a str,
            token: &'a str,
            #[serde(rename = "keyAuthorization")]
            key_authorization: &'a str,
        }

        let response = self
            .post_signed(
                &challenge.uri,
                "challenge",
                &ChallengeResponse {
                    kind: &challenge.kind,
                    token: &challenge.token,
                    key_authorization,
                },
            )
            .await?;

        if response.status == StatusCode::ACCEPTED {
            debug!(challenge = %challenge.uri, kind = %challenge.kind, "Challenge response accepted");
            return Ok(());
        }

        // The CA either embeds the problem in the challenge or sends it bare
        let embedded = serde_json::from_slice::<Challenge>(&response.body)
            .ok()
            .and_then(|c| c.error);
        let mut problem = embedded.unwrap_or_else(|| response.problem());
        problem.status = response.status.as_u16();

        Err(AcmeError::Protocol {
            url: response.url,
            problem,
        })
    }

    /// Poll the challenge while it is `pending` or `processing`
    ///
    /// Any other status than `valid` ends the wait with `ChallengeFailed`.
    pub async fn wait_for_challenge(
        &mut self,
        domain: &str,
        challenge: &Challenge,
    ) -> Result<Challenge, AcmeError> {
        let policy = self.options.challenge_poll;
        let mut poller = Poller::new(policy);

        loop {
            let response = self.get(&challenge.uri).await?.error_for_status()?;
            let current: Challenge = response.json()?;
            debug!(domain = %domain, kind = %current.kind, status = %current.status, "Challenge status");

            match current.status {
                Status::Valid => return Ok(current),
                Status::Pending | Status::Processing => {}
                Status::Invalid | Status::Expired | Status::Revoked | Status::Unknown => {
                    return Err(AcmeError::ChallengeFailed {
                        domain: domain.to_string(),
                        challenge_type: challenge.kind.clone(),
                        status: current.status.to_string(),
                        problem: current.error,
                    });
                }
            }

            poller.tick().await.map_err(|_| AcmeError::Timeout {
                what: format!("{} challenge for {}", challenge.kind, domain),
                timeout: policy.timeout,
                last_status: current.status.to_string(),
            })?;
        }
    }

    /// `new-cert`: submit a DER CSR, returning the certificate URL
    pub async fn request_certificate(&mut self, csr_der: &[u8]) -> Result<String, AcmeError> {
        #[derive(Serialize)]
        struct NewCert {
            csr: String,
        }

        let url = self.require_directory()?.new_cert.clone();
        let response = self
            .post_signed(
                &url,
                "new-cert",
                &NewCert {
                    csr: URL_SAFE_NO_PAD.encode(csr_der),
                },
            )
            .await?
            .error_for_status()?;

        let location = response.location().ok_or_else(|| AcmeError::InvalidResponse {
            url,
            message: "new-cert response has no Location header".to_string(),
        })?;

        info!(certificate = %location, "Certificate requested");
        Ok(location)
    }

    /// Poll the certificate URL until the CA serves it, then collect issuers
    ///
    /// `202 Accepted` means issuance is still in progress.
    pub async fn fetch_certificate(&mut self, url: &str) -> Result<IssuedCertificate, AcmeError> {
        let policy = self.options.certificate_poll;
        let mut poller = Poller::new(policy);

        loop {
            let response = self.get(url).await?.error_for_status()?;

            match response.status {
                StatusCode::OK => {
                    let chain = self.fetch_issuer_chain(url, &response.headers).await?;
                    info!(certificate = %url, chain_len = chain.len(), "Retrieved certificate");
                    return Ok(IssuedCertificate {
                        certificate: response.body.to_vec(),
                        chain,
                    });
                }
                StatusCode::ACCEPTED => {
                    debug!(certificate = %url, "Creation of certificate is still ongoing");
                }
                other => {
                    return Err(AcmeError::InvalidResponse {
                        url: url.to_string(),
                        message: format!("unexpected status {other} while fetching certificate"),
                    });
                }
            }

            poller.tick().await.map_err(|_| AcmeError::Timeout {
                what: format!("certificate at {url}"),
                timeout: policy.timeout,
                last_status: "processing".to_string(),
            })?;
        }
    }

    /// Follow `rel="up"` links, each resolved against the URL that served it
    async fn fetch_issuer_chain(
        &mut self,
        certificate_url: &str,
        headers: &HeaderMap,
    ) -> Result<Vec<Vec<u8>>, AcmeError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut base = parse_url(certificate_url)?;
        let mut next = find_link(headers, "up");

        if next.is_none() {
            warn!(certificate = %certificate_url, "Certificate response has no issuer link");
        }

        while let Some(link) = next.take() {
            if chain.len() >= MAX_ISSUER_DEPTH {
                warn!(depth = chain.len(), "Issuer chain is deeper than supported, truncating");
                break;
            }

            let issuer_url = base.join(&link.uri).map_err(|e| AcmeError::InvalidResponse {
                url: base.to_string(),
                message: format!("invalid issuer link {}: {e}", link.uri),
            })?;
            if !seen.insert(issuer_url.to_string()) {
                break;
            }

            debug!(issuer = %issuer_url, "Retrieving issuer's certificate");
            let response = self.get(issuer_url.as_str()).await?.error_for_status()?;
            chain.push(response.body.to_vec());

            next = find_link(&response.headers, "up");
            base = issuer_url;
        }

        Ok(chain)
    }

    fn require_directory(&self) -> Result<&Directory, AcmeError> {
        self.directory.as_ref().ok_or(AcmeError::NotInitialized)
    }

    fn update_nonce(&mut self, headers: &HeaderMap) {
        self.nonce = headers
            .get(REPLAY_NONCE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        trace!(nonce = ?self.nonce, "Updated replay nonce");
    }

    async fn read(&mut self, url: &str, response: reqwest::Response) -> Result<RawResponse, AcmeError> {
        let status = response.status();
        let headers = response.headers().clone();
        self.update_nonce(&headers);

        let body = response.bytes().await.map_err(|source| AcmeError::Transport {
            url: url.to_string(),
            source,
        })?;

        trace!(url = %url, status = %status, body_len = body.len(), "ACME response");
        Ok(RawResponse {
            url: url.to_string(),
            status,
            headers,
            body,
        })
    }

    async fn get(&mut self, url: &str) -> Result<RawResponse, AcmeError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|source| AcmeError::Transport {
                url: url.to_string(),
                source,
            })?;
        self.read(url, response).await
    }

    /// Fetch a fresh nonce from the directory URL
    async fn refresh_nonce(&mut self) -> Result<String, AcmeError> {
        let url = self.directory_url.clone();
        let response = self
            .http
            .head(&url)
            .send()
            .await
            .map_err(|source| AcmeError::Transport {
                url: url.clone(),
                source,
            })?;
        self.update_nonce(response.headers());

        self.nonce.clone().ok_or_else(|| AcmeError::InvalidResponse {
            url,
            message: format!("no {REPLAY_NONCE_HEADER} header in response"),
        })
    }

    /// Sign and post `body`; a `badNonce` rejection is retried once
    async fn post_signed<T: Serialize>(
        &mut self,
        url: &str,
        resource: &str,
        body: &T,
    ) -> Result<RawResponse, AcmeError> {
        let mut retried = false;

        loop {
            let nonce = match self.nonce.clone() {
                Some(nonce) => nonce,
                None => self.refresh_nonce().await?,
            };

            let key = self.account_key.as_ref().ok_or(AcmeError::NotInitialized)?;
            let jws = sign_request(key, &nonce, resource, body)?;
            let payload = serde_json::to_vec(&jws)?;

            trace!(url = %url, resource = %resource, "Posting signed request");
            let response = self
                .http
                .post(url)
                .header(CONTENT_TYPE, JOSE_CONTENT_TYPE)
                .body(payload)
                .send()
                .await
                .map_err(|source| AcmeError::Transport {
                    url: url.to_string(),
                    source,
                })?;
            let response = self.read(url, response).await?;

            if !retried && response.is_error() && response.problem().is_bad_nonce() {
                warn!(url = %url, resource = %resource, "Nonce rejected, retrying with the fresh one");
                retried = true;
                continue;
            }

            return Ok(response);
        }
    }
}

fn parse_url(url: &str) -> Result<Url, AcmeError> {
    Url::parse(url).map_err(|e| AcmeError::InvalidResponse {
        url: url.to_string(),
        message: e.to_string(),
    })
}
