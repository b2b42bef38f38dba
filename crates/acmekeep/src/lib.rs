//! acmekeep - ACME certificate agent
//!
//! Registers an account with an ACME CA, proves control of domains, obtains
//! certificates and keeps every piece of key material in a versioned store so
//! runs are idempotent and can resume after a failure.
//!
//! # Architecture
//!
//! - [`blob::BlobStore`] - hierarchical key/value storage (filesystem, memory)
//! - [`storage::Store`] - account and per-domain material on top of a blob store
//! - [`dns::Route53Provider`] - DNS-01 TXT records with an `INSYNC` barrier
//! - [`dns::Route53Client`] - SigV4-signed Route53 REST API
//! - [`challenge::ChallengeSolver`] - DNS, local HTTP listener or public bucket
//! - [`protocol::AcmeClient`] - directory, nonces, JWS, polling, issuer chain
//! - [`service`] - the register, authorize, issue, inventory and sync workflows
//! - [`scheduler::RenewalScheduler`] - re-issues certificates near expiry
//!
//! # Challenge Flow
//!
//! 1. [`service::AuthorizeService`] asks the CA for a new authorization
//! 2. [`challenge::find_challenge`] picks the challenge for the configured strategy
//! 3. The solver provisions the artifact derived from the key authorization
//! 4. The client submits the challenge and polls until `valid` or `invalid`
//! 5. The artifact is removed whatever the outcome
//! 6. The final authorization is persisted so later runs can skip it

// ============================================================================
// Module Declarations
// ============================================================================

pub mod blob;
pub mod certificate;
pub mod challenge;
pub mod config;
pub mod dns;
pub mod error;
pub mod key;
pub mod poll;
pub mod protocol;
pub mod scheduler;
pub mod service;
pub mod storage;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use certificate::{needs_renewal, CertificateInfo};
pub use challenge::{ChallengeBackends, ChallengeSolver, ChallengeStrategy, SolveChallenge};
pub use config::AgentConfig;
pub use error::{AcmeError, ConfigError, DnsProviderError, KeyError, ProblemDetails, StorageError};
pub use key::{build_key_authorization, AccountKey, CertKey};
pub use poll::{PollPolicy, Poller};
pub use protocol::{AcmeClient, Authorization, Challenge, ClientOptions, Status};
pub use scheduler::{RenewalReport, RenewalScheduler};
pub use service::Agent;
pub use storage::{Store, StoreLayout};
