//! Shared fixtures for the integration tests: a wiremock-backed ACME CA,
//! an in-memory DNS provider and self-signed certificates.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rcgen::{date_time_ymd, CertificateParams, DistinguishedName, DnType, KeyPair};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use acmekeep::blob::MemoryBlobStore;
use acmekeep::challenge::ChallengeBackends;
use acmekeep::dns::{
    ChangeBatch, ChangeInfo, ChangeStatus, HostedZone, HostedZoneApi, HostedZonePage,
};
use acmekeep::poll::PollPolicy;
use acmekeep::service::Agent;
use acmekeep::{AccountKey, AgentConfig, DnsProviderError, Store, StoreLayout};

pub const EMAIL: &str = "admin@example.org";

/// Short polling so the tests run in milliseconds
pub fn fast_poll() -> PollPolicy {
    PollPolicy::new(Duration::from_millis(10), Duration::from_secs(5))
}

// ============================================================================
// Mock CA
// ============================================================================

pub struct MockCa {
    pub server: MockServer,
}

impl MockCa {
    /// Start the server with the directory (GET) and nonce (HEAD) endpoints
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let uri = server.uri();

        Mock::given(method("GET"))
            .and(path("/directory"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Replay-Nonce", "nonce-directory")
                    .set_body_json(json!({
                        "new-reg": format!("{uri}/acme/new-reg"),
                        "new-authz": format!("{uri}/acme/new-authz"),
                        "new-cert": format!("{uri}/acme/new-cert"),
                        "revoke-cert": format!("{uri}/acme/revoke-cert"),
                    })),
            )
            .mount(&server)
            .await;

        Mock::given(method("HEAD"))
            .and(path("/directory"))
            .respond_with(ResponseTemplate::new(200).insert_header("Replay-Nonce", "nonce-head"))
            .mount(&server)
            .await;

        Self { server }
    }

    pub fn uri(&self) -> String {
        self.server.uri()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    pub fn directory_url(&self) -> String {
        self.url("/directory")
    }

    /// Configuration pointing at this CA with fast polling
    pub fn config(&self) -> AgentConfig {
        AgentConfig {
            directory_url: self.directory_url(),
            challenge_poll: fast_poll(),
            certificate_poll: fast_poll(),
            dns_poll: fast_poll(),
            ..AgentConfig::default()
        }
    }

    /// Requests received on `path` with `verb`
    pub async fn requests(&self, verb: &str, path: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == verb && r.url.path() == path)
            .collect()
    }
}

/// A `new-authz` body for `domain` offering dns-01 and http-01 separately
pub fn pending_authorization(ca: &MockCa, domain: &str) -> Value {
    json!({
        "status": "pending",
        "expires": (chrono::Utc::now() + chrono::Duration::days(7)).to_rfc3339(),
        "identifier": { "type": "dns", "value": domain },
        "challenges": [
            {
                "type": "dns-01",
                "uri": ca.url("/acme/challenge/dns"),
                "token": "dns-token",
                "status": "pending"
            },
            {
                "type": "http-01",
                "uri": ca.url("/acme/challenge/http"),
                "token": "http-token",
                "status": "pending"
            }
        ],
        "combinations": [[0], [1]]
    })
}

pub fn challenge_body(ca: &MockCa, status: &str) -> Value {
    json!({
        "type": "dns-01",
        "uri": ca.url("/acme/challenge/dns"),
        "token": "dns-token",
        "status": status
    })
}

/// Decoded protected header of a signed request
pub fn protected_header(request: &Request) -> Value {
    let jws: Value = serde_json::from_slice(&request.body).unwrap();
    let protected = URL_SAFE_NO_PAD
        .decode(jws["protected"].as_str().unwrap())
        .unwrap();
    serde_json::from_slice(&protected).unwrap()
}

/// Decoded payload of a signed request
pub fn signed_payload(request: &Request) -> Value {
    let jws: Value = serde_json::from_slice(&request.body).unwrap();
    let payload = URL_SAFE_NO_PAD
        .decode(jws["payload"].as_str().unwrap())
        .unwrap();
    serde_json::from_slice(&payload).unwrap()
}

// ============================================================================
// DNS provider
// ============================================================================

/// Single `example.org.` zone; every change turns INSYNC after `sync_after` polls
pub struct InSyncAfter {
    sync_after: usize,
    polls: AtomicUsize,
    pub batches: Mutex<Vec<(String, ChangeBatch)>>,
}

impl InSyncAfter {
    pub fn new(sync_after: usize) -> Self {
        Self {
            sync_after,
            polls: AtomicUsize::new(0),
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<(String, ChangeBatch)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostedZoneApi for InSyncAfter {
    async fn list_hosted_zones(
        &self,
        _marker: Option<&str>,
    ) -> Result<HostedZonePage, DnsProviderError> {
        Ok(HostedZonePage {
            zones: vec![
                HostedZone {
                    id: "/hostedzone/ORG".to_string(),
                    name: "org.".to_string(),
                },
                HostedZone {
                    id: "/hostedzone/EXAMPLE".to_string(),
                    name: "example.org.".to_string(),
                },
            ],
            next_marker: None,
        })
    }

    async fn change_resource_record_sets(
        &self,
        zone_id: &str,
        batch: &ChangeBatch,
    ) -> Result<ChangeInfo, DnsProviderError> {
        let mut batches = self.batches.lock().unwrap();
        batches.push((zone_id.to_string(), batch.clone()));
        Ok(ChangeInfo {
            id: format!("/change/C{}", batches.len()),
            status: ChangeStatus::Pending,
        })
    }

    async fn get_change(&self, change_id: &str) -> Result<ChangeInfo, DnsProviderError> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ChangeInfo {
            id: change_id.to_string(),
            status: if polls % self.sync_after == 0 {
                ChangeStatus::InSync
            } else {
                ChangeStatus::Pending
            },
        })
    }
}

// ============================================================================
// Agent and certificates
// ============================================================================

/// Agent over an in-memory store with an account key already saved
pub async fn agent_with_account(
    config: AgentConfig,
    backends: ChallengeBackends,
) -> (Agent, Store) {
    let agent = Agent::new(config, Arc::new(MemoryBlobStore::new()), backends);
    let store = agent.store(EMAIL).unwrap();
    store.save_account(&AccountKey::generate()).await.unwrap();
    (agent, store)
}

pub fn store_in_memory(layout: StoreLayout) -> Store {
    Store::new(Arc::new(MemoryBlobStore::new()), layout, EMAIL).unwrap()
}

/// Self-signed certificate valid until January 1st of `expiry_year`
pub fn self_signed(names: &[&str], expiry_year: i32) -> rcgen::Certificate {
    let key_pair = KeyPair::generate().unwrap();
    let mut params =
        CertificateParams::new(names.iter().map(|n| n.to_string()).collect::<Vec<_>>()).unwrap();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, names[0]);
    params.not_before = date_time_ymd(2024, 1, 1);
    params.not_after = date_time_ymd(expiry_year, 1, 1);
    params.self_signed(&key_pair).unwrap()
}

pub fn self_signed_der(names: &[&str], expiry_year: i32) -> Vec<u8> {
    self_signed(names, expiry_year).der().to_vec()
}

pub fn self_signed_pem(names: &[&str], expiry_year: i32) -> String {
    self_signed(names, expiry_year).pem()
}
