//! ACME protocol: wire types, request signing and the client state machine
//!
//! The client speaks the resource-based ACME draft: every signed body carries
//! a `resource` field and endpoints are discovered from the directory and
//! from `Location`/`Link` headers.

mod client;
mod jws;
mod link;

pub use client::{AcmeClient, ClientOptions, NewRegistration, REPLAY_NONCE_HEADER};
pub use jws::{sign_request, FlattenedJws};
pub use link::{find_link, parse_link_header, Link};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProblemDetails;
use crate::key::encode_pem;

/// Challenge type for DNS TXT record validation
pub const CHALLENGE_DNS_01: &str = "dns-01";

/// Challenge type for HTTP well-known validation
pub const CHALLENGE_HTTP_01: &str = "http-01";

/// Identifier type for domain names
pub const IDENTIFIER_DNS: &str = "dns";

/// CA-advertised endpoints, fetched once per client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    #[serde(rename = "new-authz")]
    pub new_authz: String,
    #[serde(rename = "new-cert")]
    pub new_cert: String,
    #[serde(rename = "new-reg")]
    pub new_reg: String,
    #[serde(rename = "revoke-cert", default)]
    pub revoke_cert: String,
}

/// Status shared by authorizations and challenges
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Processing,
    Valid,
    Invalid,
    Expired,
    Revoked,
    #[serde(other)]
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processing => "processing",
            Status::Valid => "valid",
            Status::Invalid => "invalid",
            Status::Expired => "expired",
            Status::Revoked => "revoked",
            Status::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thing being authorized (a domain name)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(domain: impl Into<String>) -> Self {
        Self {
            kind: IDENTIFIER_DNS.to_string(),
            value: domain.into(),
        }
    }
}

/// One proof-of-control mechanism offered by the CA
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Where responses are posted and the status is polled
    #[serde(default, alias = "url")]
    pub uri: String,
    /// `dns-01`, `http-01`, ...
    #[serde(rename = "type")]
    pub kind: String,
    /// Random value the key authorization is built from
    #[serde(default)]
    pub token: String,
    /// Echoed back by the CA once a response was submitted
    #[serde(
        rename = "keyAuthorization",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub key_authorization: Option<String>,
    #[serde(default)]
    pub status: Status,
    /// Why validation failed, for `invalid` challenges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProblemDetails>,
}

/// Indices into [`Authorization::challenges`] that are jointly sufficient
pub type Combination = Vec<usize>;

/// The CA's record that an identifier is being or was validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Where the authorization lives; taken from `Location`, not the body
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: Status,
    /// RFC 3339 timestamp as sent by the CA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub identifier: Identifier,
    /// Challenges offered for the identifier
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    /// Sets of challenge indices, any one of which suffices
    #[serde(default)]
    pub combinations: Vec<Combination>,
}

impl Authorization {
    /// Parsed expiry; `None` when absent or unparseable
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    }

    /// An authorization without a readable expiry counts as expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_none_or(|expires| expires < now)
    }

    /// Valid and not expired: a new run may skip re-authorization
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == Status::Valid && !self.is_expired(now)
    }
}

/// Account registration record as persisted after `new-reg`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub email: String,
    /// Account URL returned in `Location`
    pub url: String,
    /// Terms of service the CA linked to
    pub terms_of_service: String,
    /// Whether the agreement was submitted
    #[serde(default)]
    pub agreed: bool,
    /// `mailto:` URIs sent with the registration
    #[serde(default)]
    pub contacts: Vec<String>,
    pub created: DateTime<Utc>,
}

/// Leaf certificate plus the issuer chain, all DER
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// Leaf certificate
    pub certificate: Vec<u8>,
    /// Issuers, nearest first
    pub chain: Vec<Vec<u8>>,
}

impl IssuedCertificate {
    /// PEM bundle: leaf first, then issuers in `up` order
    pub fn to_pem(&self) -> String {
        std::iter::once(&self.certificate)
            .chain(self.chain.iter())
            .map(|der| encode_pem("CERTIFICATE", der))
            .collect()
    }
}
