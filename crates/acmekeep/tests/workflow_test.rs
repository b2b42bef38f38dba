//! End-to-end tests of the register, authorize, issue, inventory and sync
//! workflows against a mock CA and an in-memory DNS provider.

mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use acmekeep::blob::FsBlobStore;
use acmekeep::challenge::{ChallengeBackends, ChallengeStrategy, HttpSolverOptions};
use acmekeep::dns::{validation_label, ChangeAction, CHALLENGE_RECORD_TTL};
use acmekeep::key::dns_challenge_value;
use acmekeep::service::{
    Agent, AuthorizeOptions, AuthorizeService, InventoryService, IssueOptions, IssueOutcome,
    IssueRequest, IssueService, RegisterOptions, RegisterService, SyncService,
};
use acmekeep::{
    build_key_authorization, AcmeClient, AcmeError, AgentConfig, Authorization, CertKey,
    PollPolicy, Status, StoreLayout,
};

use common::{agent_with_account, challenge_body, pending_authorization, InSyncAfter, MockCa};

fn valid_authorization(ca: &MockCa, domain: &str) -> serde_json::Value {
    let mut body = pending_authorization(ca, domain);
    body["status"] = json!("valid");
    body["expires"] = json!((Utc::now() + Duration::days(30)).to_rfc3339());
    body["challenges"][0]["status"] = json!("valid");
    body
}

fn dns_backends(api: Arc<InSyncAfter>) -> ChallengeBackends {
    ChallengeBackends {
        dns: Some(api),
        ..ChallengeBackends::default()
    }
}

/// new-authz, challenge submission and authorization fetch for `example.org`
async fn mount_dns_authorization(ca: &MockCa, final_challenge_status: &str) {
    Mock::given(method("POST"))
        .and(path("/acme/new-authz"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("Replay-Nonce", "nonce-authz")
                .insert_header("Location", ca.url("/acme/authz/1").as_str())
                .set_body_json(pending_authorization(ca, "example.org")),
        )
        .expect(1)
        .mount(&ca.server)
        .await;

    Mock::given(method("POST"))
        .and(path("/acme/challenge/dns"))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("Replay-Nonce", "nonce-challenge")
                .set_body_json(challenge_body(ca, "pending")),
        )
        .mount(&ca.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/acme/challenge/dns"))
        .respond_with(ResponseTemplate::new(200).set_body_json(challenge_body(ca, "pending")))
        .up_to_n_times(1)
        .mount(&ca.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/acme/challenge/dns"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(challenge_body(ca, final_challenge_status)),
        )
        .mount(&ca.server)
        .await;

    Mock::given(method("GET"))
        .and(path("/acme/authz/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(valid_authorization(ca, "example.org")))
        .mount(&ca.server)
        .await;
}

// ============================================================================
// Registration
// ============================================================================

mod registration {
    use super::*;

    #[tokio::test]
    async fn test_register_and_agree_then_skip() {
        let ca = MockCa::start().await;

        Mock::given(method("POST"))
            .and(path("/acme/new-reg"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", ca.url("/acme/reg/1").as_str())
                    .insert_header("Link", "<https://ca.test/terms.pdf>;rel=\"terms-of-service\"")
                    .set_body_json(json!({})),
            )
            .expect(1)
            .mount(&ca.server)
            .await;
        Mock::given(method("POST"))
            .and(path("/acme/reg/1"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({})))
            .expect(1)
            .mount(&ca.server)
            .await;

        let agent = Agent::new(
            ca.config(),
            Arc::new(acmekeep::blob::MemoryBlobStore::new()),
            ChallengeBackends::default(),
        );
        let store = agent.store(common::EMAIL).unwrap();
        let options = RegisterOptions {
            agree_tos: true,
            override_existing: false,
        };

        let registration = RegisterService::new(&agent)
            .register(&store, &options)
            .await
            .unwrap();
        assert_eq!(registration.url, ca.url("/acme/reg/1"));
        assert_eq!(registration.terms_of_service, "https://ca.test/terms.pdf");
        assert!(registration.agreed);
        assert_eq!(registration.contacts, vec!["mailto:admin@example.org"]);

        assert_eq!(store.load_registration().await.unwrap(), registration);
        store.load_account().await.unwrap();

        // Second run finds the registration and stays offline
        let again = RegisterService::new(&agent)
            .register(&store, &options)
            .await
            .unwrap();
        assert_eq!(again, registration);
    }

    fn memory_agent(ca: &MockCa) -> Agent {
        Agent::new(
            ca.config(),
            Arc::new(acmekeep::blob::MemoryBlobStore::new()),
            ChallengeBackends::default(),
        )
    }

    async fn mount_new_reg(ca: &MockCa, account: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/acme/new-reg"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", ca.url(account).as_str())
                    .insert_header("Link", "<https://ca.test/terms.pdf>;rel=\"terms-of-service\"")
                    .set_body_json(json!({})),
            )
            .up_to_n_times(times)
            .mount(&ca.server)
            .await;
    }

    #[tokio::test]
    async fn test_register_without_agreement() {
        let ca = MockCa::start().await;
        mount_new_reg(&ca, "/acme/reg/1", 1).await;
        Mock::given(method("POST"))
            .and(path("/acme/reg/1"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&ca.server)
            .await;

        let agent = memory_agent(&ca);
        let store = agent.store(common::EMAIL).unwrap();
        let registration = RegisterService::new(&agent)
            .register(&store, &RegisterOptions::default())
            .await
            .unwrap();

        assert!(!registration.agreed);
        assert_eq!(registration.terms_of_service, "https://ca.test/terms.pdf");

        let stored = store.load_registration().await.unwrap();
        assert!(!stored.agreed);
        assert_eq!(stored.url, ca.url("/acme/reg/1"));
        store.load_account().await.unwrap();
    }

    #[tokio::test]
    async fn test_override_registers_a_new_key() {
        let ca = MockCa::start().await;
        mount_new_reg(&ca, "/acme/reg/1", 1).await;
        mount_new_reg(&ca, "/acme/reg/2", 1).await;

        let agent = memory_agent(&ca);
        let store = agent.store(common::EMAIL).unwrap();
        let service = RegisterService::new(&agent);

        service
            .register(&store, &RegisterOptions::default())
            .await
            .unwrap();
        let first_key = store.load_account().await.unwrap().thumbprint();

        let registration = service
            .register(
                &store,
                &RegisterOptions {
                    agree_tos: false,
                    override_existing: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(registration.url, ca.url("/acme/reg/2"));
        assert_eq!(store.load_registration().await.unwrap().url, ca.url("/acme/reg/2"));
        assert_ne!(store.load_account().await.unwrap().thumbprint(), first_key);

        // Each new-reg was signed with its own key
        let posts = ca.requests("POST", "/acme/new-reg").await;
        assert_eq!(posts.len(), 2);
        assert_ne!(
            common::protected_header(&posts[0])["jwk"],
            common::protected_header(&posts[1])["jwk"]
        );
    }

    #[tokio::test]
    async fn test_failed_override_keeps_stored_account() {
        let ca = MockCa::start().await;
        mount_new_reg(&ca, "/acme/reg/1", 1).await;
        Mock::given(method("POST"))
            .and(path("/acme/new-reg"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "type": "urn:acme:error:serverInternal",
                "detail": "registration is temporarily unavailable"
            })))
            .mount(&ca.server)
            .await;

        let agent = memory_agent(&ca);
        let store = agent.store(common::EMAIL).unwrap();
        let service = RegisterService::new(&agent);

        service
            .register(&store, &RegisterOptions::default())
            .await
            .unwrap();
        let before = store.load_account().await.unwrap().thumbprint();

        let err = service
            .register(
                &store,
                &RegisterOptions {
                    agree_tos: false,
                    override_existing: true,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.problem().map(|p| p.status), Some(500));

        // Key and registration still describe the first account
        assert_eq!(store.load_account().await.unwrap().thumbprint(), before);
        assert_eq!(store.load_registration().await.unwrap().url, ca.url("/acme/reg/1"));
    }

    #[tokio::test]
    async fn test_failed_first_registration_stores_nothing() {
        let ca = MockCa::start().await;
        Mock::given(method("POST"))
            .and(path("/acme/new-reg"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
            .mount(&ca.server)
            .await;

        let agent = memory_agent(&ca);
        let store = agent.store(common::EMAIL).unwrap();
        let err = RegisterService::new(&agent)
            .register(&store, &RegisterOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AcmeError::NoTermsOfServiceFound));
        assert!(store.load_account().await.unwrap_err().is_not_found());
        assert!(store.load_registration().await.unwrap_err().is_not_found());
    }
}

// ============================================================================
// Authorization
// ============================================================================

mod authorization {
    use super::*;

    #[tokio::test]
    async fn test_dns_authorization_end_to_end() {
        let ca = MockCa::start().await;
        mount_dns_authorization(&ca, "valid").await;

        let dns = Arc::new(InSyncAfter::new(2));
        let (agent, store) = agent_with_account(ca.config(), dns_backends(dns.clone())).await;
        let mut client = agent.connect(&store).await.unwrap();
        let options = AuthorizeOptions {
            strategy: ChallengeStrategy::Dns01,
            renew: false,
        };

        let authz = AuthorizeService::new(&agent)
            .authorize(&mut client, &store, "example.org", options)
            .await
            .unwrap();
        assert_eq!(authz.status, Status::Valid);
        assert_eq!(authz.url, ca.url("/acme/authz/1"));

        let persisted = store.load_authorization("example.org").await.unwrap();
        assert_eq!(persisted.status, Status::Valid);
        assert!(persisted.is_usable(Utc::now()));

        // Record upserted, synced, then deleted and synced again
        let account_key = store.load_account().await.unwrap();
        let key_authorization = build_key_authorization("dns-token", &account_key);
        let batches = dns.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(dns.polls(), 4);

        let (zone_id, upsert) = &batches[0];
        assert_eq!(zone_id, "/hostedzone/EXAMPLE");
        let change = &upsert.changes[0];
        assert_eq!(change.action, ChangeAction::Upsert);
        assert_eq!(change.record_set.name, validation_label("example.org"));
        assert_eq!(change.record_set.record_type, "TXT");
        assert_eq!(change.record_set.ttl, CHALLENGE_RECORD_TTL);
        assert_eq!(
            change.record_set.values,
            vec![format!("\"{}\"", dns_challenge_value(&key_authorization))]
        );
        assert_eq!(batches[1].1.changes[0].action, ChangeAction::Delete);

        // The submitted key authorization matches the one that was deployed
        let posts = ca.requests("POST", "/acme/challenge/dns").await;
        assert_eq!(
            common::signed_payload(&posts[0])["keyAuthorization"],
            key_authorization
        );

        // A second run reuses the persisted authorization (new-authz expects one call)
        let again = AuthorizeService::new(&agent)
            .authorize(&mut client, &store, "example.org", options)
            .await
            .unwrap();
        assert_eq!(again, persisted);
    }

    #[tokio::test]
    async fn test_invalid_challenge_still_cleans_up() {
        let ca = MockCa::start().await;
        mount_dns_authorization(&ca, "invalid").await;

        let dns = Arc::new(InSyncAfter::new(1));
        let (agent, store) = agent_with_account(ca.config(), dns_backends(dns.clone())).await;
        let mut client = agent.connect(&store).await.unwrap();

        let err = AuthorizeService::new(&agent)
            .authorize(
                &mut client,
                &store,
                "example.org",
                AuthorizeOptions {
                    strategy: ChallengeStrategy::Dns01,
                    renew: false,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AcmeError::ChallengeFailed { .. }));
        let actions: Vec<_> = dns
            .batches()
            .iter()
            .map(|(_, batch)| batch.changes[0].action)
            .collect();
        assert_eq!(actions, vec![ChangeAction::Upsert, ChangeAction::Delete]);
        assert!(store
            .load_authorization("example.org")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_dns_wait_follows_configured_policy() {
        let ca = MockCa::start().await;
        mount_dns_authorization(&ca, "valid").await;

        let dns_poll = PollPolicy::new(
            std::time::Duration::from_millis(10),
            std::time::Duration::from_millis(100),
        );
        let config = AgentConfig {
            dns_poll,
            ..ca.config()
        };
        // Never INSYNC within the test
        let dns = Arc::new(InSyncAfter::new(1_000_000));
        let (agent, store) = agent_with_account(config, dns_backends(dns.clone())).await;
        let mut client = agent.connect(&store).await.unwrap();

        let err = AuthorizeService::new(&agent)
            .authorize(
                &mut client,
                &store,
                "example.org",
                AuthorizeOptions {
                    strategy: ChallengeStrategy::Dns01,
                    renew: false,
                },
            )
            .await
            .unwrap_err();

        match err {
            AcmeError::DnsPropagationTimeout { timeout, .. } => assert_eq!(timeout, dns_poll.timeout),
            other => panic!("unexpected error: {other:?}"),
        }

        // The record was still removed, and the CA was never asked to validate
        let actions: Vec<_> = dns
            .batches()
            .iter()
            .map(|(_, batch)| batch.changes[0].action)
            .collect();
        assert_eq!(actions, vec![ChangeAction::Upsert, ChangeAction::Delete]);
        assert!(ca.requests("POST", "/acme/challenge/dns").await.is_empty());
    }

    #[tokio::test]
    async fn test_authorize_deadline_still_closes_listener() {
        let ca = MockCa::start().await;

        Mock::given(method("POST"))
            .and(path("/acme/new-authz"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", ca.url("/acme/authz/1").as_str())
                    .set_body_json(pending_authorization(&ca, "example.org")),
            )
            .mount(&ca.server)
            .await;
        let http_challenge = json!({
            "type": "http-01",
            "uri": ca.url("/acme/challenge/http"),
            "token": "http-token",
            "status": "pending"
        });
        Mock::given(method("POST"))
            .and(path("/acme/challenge/http"))
            .respond_with(ResponseTemplate::new(202).set_body_json(http_challenge.clone()))
            .mount(&ca.server)
            .await;
        // The CA never gets around to validating
        Mock::given(method("GET"))
            .and(path("/acme/challenge/http"))
            .respond_with(ResponseTemplate::new(200).set_body_json(http_challenge))
            .mount(&ca.server)
            .await;

        let port = {
            let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            free.local_addr().unwrap().port()
        };
        let deadline = std::time::Duration::from_millis(300);
        let config = AgentConfig {
            authorize_timeout: deadline,
            http: HttpSolverOptions {
                bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port,
                settle_delay: std::time::Duration::ZERO,
            },
            ..ca.config()
        };
        let (agent, store) = agent_with_account(config, ChallengeBackends::default()).await;
        let mut client = agent.connect(&store).await.unwrap();

        let err = AuthorizeService::new(&agent)
            .authorize(
                &mut client,
                &store,
                "example.org",
                AuthorizeOptions {
                    strategy: ChallengeStrategy::Http01,
                    renew: false,
                },
            )
            .await
            .unwrap_err();

        match err {
            AcmeError::Timeout { what, timeout, .. } => {
                assert_eq!(what, "authorization of example.org");
                assert_eq!(timeout, deadline);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The challenge was submitted before the deadline fired
        assert_eq!(ca.requests("POST", "/acme/challenge/http").await.len(), 1);
        // Listener is gone and nothing was persisted
        assert!(tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok());
        assert!(store
            .load_authorization("example.org")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_missing_dns_backend() {
        let ca = MockCa::start().await;

        Mock::given(method("POST"))
            .and(path("/acme/new-authz"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", ca.url("/acme/authz/1").as_str())
                    .set_body_json(pending_authorization(&ca, "example.org")),
            )
            .mount(&ca.server)
            .await;

        let (agent, store) = agent_with_account(ca.config(), ChallengeBackends::default()).await;
        let mut client = agent.connect(&store).await.unwrap();

        let err = AuthorizeService::new(&agent)
            .authorize(
                &mut client,
                &store,
                "example.org",
                AuthorizeOptions {
                    strategy: ChallengeStrategy::Dns01,
                    renew: false,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AcmeError::MissingBackend { .. }));
    }

    #[tokio::test]
    async fn test_ca_reused_valid_authorization() {
        let ca = MockCa::start().await;

        Mock::given(method("POST"))
            .and(path("/acme/new-authz"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("Location", ca.url("/acme/authz/9").as_str())
                    .set_body_json(valid_authorization(&ca, "example.org")),
            )
            .mount(&ca.server)
            .await;

        let (agent, store) = agent_with_account(ca.config(), ChallengeBackends::default()).await;
        let mut client = agent.connect(&store).await.unwrap();

        // No solver is needed when the CA already considers the domain valid
        let authz = AuthorizeService::new(&agent)
            .authorize(
                &mut client,
                &store,
                "example.org",
                AuthorizeOptions {
                    strategy: ChallengeStrategy::Dns01,
                    renew: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(authz.status, Status::Valid);
        assert_eq!(
            store.load_authorization("example.org").await.unwrap().url,
            ca.url("/acme/authz/9")
        );
    }
}

// ============================================================================
// Issuance
// ============================================================================

mod issuance {
    use super::*;

    async fn seed_authorization(ca: &MockCa, agent: &Agent, domain: &str) {
        let store = agent.store(common::EMAIL).unwrap();
        let mut authz: Authorization =
            serde_json::from_value(valid_authorization(ca, domain)).unwrap();
        authz.url = ca.url(&format!("/acme/authz/{domain}"));
        store.save_authorization(domain, &authz).await.unwrap();
    }

    async fn mount_certificate(ca: &MockCa, leaf: Vec<u8>, issuer: Vec<u8>) {
        Mock::given(method("POST"))
            .and(path("/acme/new-cert"))
            .respond_with(
                ResponseTemplate::new(201).insert_header("Location", ca.url("/acme/cert/1").as_str()),
            )
            .expect(1)
            .mount(&ca.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/acme/cert/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", "</acme/issuer-cert>;rel=\"up\"")
                    .set_body_bytes(leaf),
            )
            .mount(&ca.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/acme/issuer-cert"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(issuer))
            .mount(&ca.server)
            .await;
    }

    #[tokio::test]
    async fn test_issue_with_stored_authorizations() {
        let ca = MockCa::start().await;
        mount_certificate(
            &ca,
            common::self_signed_der(&["example.org", "www.example.org"], 2049),
            common::self_signed_der(&["Test Issuer"], 2049),
        )
        .await;

        let (agent, store) = agent_with_account(ca.config(), ChallengeBackends::default()).await;
        seed_authorization(&ca, &agent, "example.org").await;
        seed_authorization(&ca, &agent, "www.example.org").await;
        let mut client = agent.connect(&store).await.unwrap();

        let request =
            IssueRequest::new("example.org").with_sans(vec!["www.example.org".to_string()]);
        let outcome = IssueService::new(&agent)
            .issue(&mut client, &store, &request, IssueOptions::default())
            .await
            .unwrap();

        let info = match outcome {
            IssueOutcome::Issued(info) => info,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(info.common_name.as_deref(), Some("example.org"));
        assert_eq!(info.san, vec!["example.org", "www.example.org"]);

        let pem = store.load_cert("example.org").await.unwrap();
        assert_eq!(pem.matches("BEGIN CERTIFICATE").count(), 2);
        store.load_cert_key("example.org").await.unwrap();

        // No new authorization was requested
        assert!(ca.requests("POST", "/acme/new-authz").await.is_empty());
        let posts = ca.requests("POST", "/acme/new-cert").await;
        assert_eq!(common::signed_payload(&posts[0])["resource"], "new-cert");
    }

    #[tokio::test]
    async fn test_reissue_reuses_stored_key() {
        let ca = MockCa::start().await;
        mount_certificate(
            &ca,
            common::self_signed_der(&["example.org"], 2049),
            common::self_signed_der(&["Test Issuer"], 2049),
        )
        .await;

        let (agent, store) = agent_with_account(ca.config(), ChallengeBackends::default()).await;
        seed_authorization(&ca, &agent, "example.org").await;

        // Expired certificate is due
        let key = CertKey::generate().unwrap();
        store.save_cert_key("example.org", &key).await.unwrap();
        store
            .save_cert("example.org", &common::self_signed_pem(&["example.org"], 2025))
            .await
            .unwrap();

        let mut client = agent.connect(&store).await.unwrap();
        let options = IssueOptions {
            reuse_key: true,
            ..IssueOptions::default()
        };
        let outcome = IssueService::new(&agent)
            .issue(&mut client, &store, &IssueRequest::new("example.org"), options)
            .await
            .unwrap();

        assert!(matches!(outcome, IssueOutcome::Issued(_)));
        assert_eq!(
            store.load_cert_key("example.org").await.unwrap().pem(),
            key.pem()
        );
    }

    #[tokio::test]
    async fn test_valid_certificate_is_not_reissued() {
        let ca = MockCa::start().await;
        let (agent, store) = agent_with_account(ca.config(), ChallengeBackends::default()).await;
        store
            .save_cert("example.org", &common::self_signed_pem(&["example.org"], 2049))
            .await
            .unwrap();

        // Never initialized: the skip path must not talk to the CA
        let mut client = AcmeClient::new(ca.directory_url(), Default::default()).unwrap();
        let outcome = IssueService::new(&agent)
            .issue(
                &mut client,
                &store,
                &IssueRequest::new("example.org"),
                IssueOptions::default(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, IssueOutcome::Skipped(_)));
        assert!(ca.server.received_requests().await.unwrap().is_empty());
    }
}

// ============================================================================
// Inventory and Sync
// ============================================================================

mod inventory {
    use super::*;

    #[tokio::test]
    async fn test_list_and_sync_from_filesystem() {
        let data = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let blobs = Arc::new(FsBlobStore::new(data.path()));

        let store = acmekeep::Store::new(blobs.clone(), StoreLayout::V2, common::EMAIL).unwrap();
        let key = CertKey::generate().unwrap();
        let cert = common::self_signed_pem(&["example.org"], 2049);
        store.save_cert_key("example.org", &key).await.unwrap();
        store.save_cert("example.org", &cert).await.unwrap();
        // A domain with a key but no certificate yet is not listed
        store
            .save_cert_key("pending.example.org", &CertKey::generate().unwrap())
            .await
            .unwrap();

        let entries = InventoryService::new(blobs.clone(), StoreLayout::V2)
            .list()
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].email, common::EMAIL);
        assert_eq!(entries[0].domain, "example.org");
        assert!(!entries[0].needs_renewal(Utc::now(), Duration::days(30)));

        let files = SyncService::new(&store)
            .sync("example.org", dest.path())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&files.certificate).unwrap(), cert);
        assert_eq!(std::fs::read_to_string(&files.private_key).unwrap(), key.pem());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&files.private_key)
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
