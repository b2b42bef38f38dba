//! Error types for the ACME agent
//!
//! [`AcmeError`] is the taxonomy every workflow returns. Persistence misses
//! are reported through [`StorageError::NotFound`] so callers can tell a first
//! run apart from a broken store.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Problem document returned by the CA (`{"type": ..., "detail": ...}`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemDetails {
    /// HTTP status code of the response carrying the problem
    #[serde(skip)]
    pub status: u16,
    /// Problem type URN, e.g. `urn:acme:error:malformed`
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Human readable explanation
    #[serde(default)]
    pub detail: String,
}

impl ProblemDetails {
    /// Whether the CA rejected the request because of a stale nonce
    pub fn is_bad_nonce(&self) -> bool {
        self.kind.ends_with(":badNonce")
    }
}

impl fmt::Display for ProblemDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acme error({}): type: {} detail: {}",
            self.status, self.kind, self.detail
        )
    }
}

/// Top-level error for protocol, challenge and orchestration failures
#[derive(Error, Debug)]
pub enum AcmeError {
    /// The CA answered with an application-level error
    #[error("{problem} (url: {url})")]
    Protocol { url: String, problem: ProblemDetails },

    /// Network or TLS failure talking to the CA
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The CA answered with something that is not the expected document
    #[error("unexpected response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    /// The client was used before `initialize`
    #[error("ACME client is not initialized")]
    NotInitialized,

    /// Registration response carried no `rel="terms-of-service"` link
    #[error("no terms of service link found in the registration response")]
    NoTermsOfServiceFound,

    /// The challenge reached a final status other than `valid`
    #[error("{challenge_type} challenge for {domain} became {status}{}", detail_suffix(.problem))]
    ChallengeFailed {
        domain: String,
        challenge_type: String,
        /// Final status reported by the CA (`invalid`, `expired`, ...)
        status: String,
        problem: Option<ProblemDetails>,
    },

    /// A polling deadline elapsed; the true status is unknown
    #[error("{what} has not completed within {timeout:?} (last status: {last_status})")]
    Timeout {
        what: String,
        timeout: Duration,
        last_status: String,
    },

    /// The DNS provider never reported the change as in sync
    #[error("DNS change {change_id} for {domain} is still not INSYNC after {timeout:?}")]
    DnsPropagationTimeout {
        domain: String,
        change_id: String,
        timeout: Duration,
    },

    /// The authorization offered a multi-challenge combination
    #[error("authorization for {domain} requires combination {combination:?}; only single-challenge combinations are supported")]
    UnsupportedCombination {
        domain: String,
        combination: Vec<usize>,
    },

    /// No challenge of the requested type is usable on its own
    #[error("no {challenge_type} challenge and its combination found for {domain}")]
    NoChallengeFound {
        domain: String,
        challenge_type: String,
    },

    /// The selected strategy has no backend wired in
    #[error("challenge strategy {strategy} has no backend configured")]
    MissingBackend { strategy: String },

    /// Challenge solver failed to provision or remove its artifact
    #[error("challenge solver for {domain} failed: {message}")]
    Solver { domain: String, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("DNS provider error: {0}")]
    Dns(#[from] DnsProviderError),

    #[error("key error: {0}")]
    Key(#[from] KeyError),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn detail_suffix(problem: &Option<ProblemDetails>) -> String {
    match problem {
        Some(p) if !p.detail.is_empty() => format!(": {}", p.detail),
        _ => String::new(),
    }
}

impl AcmeError {
    /// The CA problem document, when the error carries one
    pub fn problem(&self) -> Option<&ProblemDetails> {
        match self {
            AcmeError::Protocol { problem, .. } => Some(problem),
            AcmeError::ChallengeFailed { problem, .. } => problem.as_ref(),
            _ => None,
        }
    }

    /// Whether this is a persistence miss
    pub fn is_not_found(&self) -> bool {
        matches!(self, AcmeError::Storage(e) if e.is_not_found())
    }
}

/// Errors from the blob store and the persistence layer on top of it
#[derive(Error, Debug)]
pub enum StorageError {
    /// The key does not exist
    #[error("{key} not found")]
    NotFound { key: String },

    #[error("I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {key}: {message}")]
    Decode { key: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("email must not be empty")]
    EmptyEmail,

    /// An email or domain that cannot be used as a single key segment
    #[error("'{name}' is not a valid store name")]
    InvalidName { name: String },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Errors from a DNS hosting provider API
#[derive(Error, Debug)]
pub enum DnsProviderError {
    #[error("no hosted zone found for {domain}")]
    NoHostedZone { domain: String },

    #[error("DNS provider rejected the request: {message}")]
    Provider { message: String },

    #[error("DNS provider credentials are missing: {name} is not set")]
    MissingCredentials { name: &'static str },

    #[error("DNS provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed DNS provider response: {0}")]
    Response(String),

    #[error("failed to sign DNS provider request: {0}")]
    Signing(String),
}

/// Errors decoding or using key material
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("invalid key encoding: {0}")]
    Encoding(String),

    #[error("certificate key operation failed: {0}")]
    Rcgen(#[from] rcgen::Error),
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}
