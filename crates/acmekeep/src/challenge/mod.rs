//! Challenge selection and solving
//!
//! Every strategy provisions a proof-of-control artifact in
//! [`SolveChallenge::solve_challenge`] and removes it again in
//! [`SolveChallenge::cleanup_challenge`]. Callers run cleanup on every exit
//! path; solvers make it idempotent.

mod bucket;
mod dns;
mod http;

pub use bucket::{BucketSolver, PublicBucket};
pub use dns::DnsSolver;
pub use http::{respond, HttpSolver, HttpSolverOptions, DEFAULT_HTTP_PORT};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::dns::{HostedZoneApi, Route53Provider};
use crate::error::AcmeError;
use crate::protocol::{Authorization, Challenge, CHALLENGE_DNS_01, CHALLENGE_HTTP_01};

/// HTTP-01 path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Path the CA fetches for an HTTP-01 `token`
pub fn well_known_path(token: &str) -> String {
    format!("{ACME_CHALLENGE_PREFIX}{token}")
}

/// Configured way of proving domain control
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeStrategy {
    /// TXT record through the DNS provider
    #[default]
    #[serde(rename = "dns-01")]
    Dns01,
    /// Local HTTP listener
    #[serde(rename = "http-01")]
    Http01,
    /// Public object in a bucket served at the domain
    #[serde(rename = "s3-http-01")]
    BucketHttp01,
}

impl ChallengeStrategy {
    /// Challenge type requested from the CA
    pub fn challenge_type(&self) -> &'static str {
        match self {
            ChallengeStrategy::Dns01 => CHALLENGE_DNS_01,
            ChallengeStrategy::Http01 | ChallengeStrategy::BucketHttp01 => CHALLENGE_HTTP_01,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeStrategy::Dns01 => "dns-01",
            ChallengeStrategy::Http01 => "http-01",
            ChallengeStrategy::BucketHttp01 => "s3-http-01",
        }
    }
}

impl fmt::Display for ChallengeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dns-01" | "dns" => Ok(ChallengeStrategy::Dns01),
            "http-01" | "http" => Ok(ChallengeStrategy::Http01),
            "s3-http-01" | "bucket-http-01" => Ok(ChallengeStrategy::BucketHttp01),
            other => Err(format!(
                "unknown challenge strategy '{other}' (expected dns-01, http-01 or s3-http-01)"
            )),
        }
    }
}

/// Provision and remove a proof-of-control artifact
#[async_trait]
pub trait SolveChallenge: Send {
    async fn solve_challenge(&mut self, key_authorization: &str) -> Result<(), AcmeError>;

    /// Remove whatever `solve_challenge` provisioned; safe to call repeatedly
    async fn cleanup_challenge(&mut self, key_authorization: &str) -> Result<(), AcmeError>;
}

/// Solver selected for one challenge
#[derive(Debug)]
pub enum ChallengeSolver {
    Dns(DnsSolver),
    Http(HttpSolver),
    Bucket(BucketSolver),
}

#[async_trait]
impl SolveChallenge for ChallengeSolver {
    async fn solve_challenge(&mut self, key_authorization: &str) -> Result<(), AcmeError> {
        match self {
            ChallengeSolver::Dns(solver) => solver.solve_challenge(key_authorization).await,
            ChallengeSolver::Http(solver) => solver.solve_challenge(key_authorization).await,
            ChallengeSolver::Bucket(solver) => solver.solve_challenge(key_authorization).await,
        }
    }

    async fn cleanup_challenge(&mut self, key_authorization: &str) -> Result<(), AcmeError> {
        match self {
            ChallengeSolver::Dns(solver) => solver.cleanup_challenge(key_authorization).await,
            ChallengeSolver::Http(solver) => solver.cleanup_challenge(key_authorization).await,
            ChallengeSolver::Bucket(solver) => solver.cleanup_challenge(key_authorization).await,
        }
    }
}

/// Provider clients the solvers are built from
///
/// The local HTTP listener needs no client and is always available.
#[derive(Clone, Default)]
pub struct ChallengeBackends {
    /// Hosted zone API for DNS-01
    pub dns: Option<Arc<dyn HostedZoneApi>>,
    /// Public bucket for bucket-served HTTP-01
    pub bucket: Option<Arc<dyn PublicBucket>>,
}

impl fmt::Debug for ChallengeBackends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeBackends")
            .field("dns", &self.dns.is_some())
            .field("bucket", &self.bucket.is_some())
            .finish()
    }
}

impl ChallengeBackends {
    /// Fails with `MissingBackend` unless `strategy` can be solved
    pub fn ensure_supported(&self, strategy: ChallengeStrategy) -> Result<(), AcmeError> {
        let available = match strategy {
            ChallengeStrategy::Dns01 => self.dns.is_some(),
            ChallengeStrategy::Http01 => true,
            ChallengeStrategy::BucketHttp01 => self.bucket.is_some(),
        };

        if available {
            Ok(())
        } else {
            Err(AcmeError::MissingBackend {
                strategy: strategy.to_string(),
            })
        }
    }

    /// Build the solver for `strategy`; fails when its backend is not wired in
    ///
    /// The DNS record wait follows `config.dns_poll` and the HTTP listener
    /// `config.http`.
    pub fn solver_for(
        &self,
        strategy: ChallengeStrategy,
        domain: &str,
        challenge: &Challenge,
        config: &AgentConfig,
    ) -> Result<ChallengeSolver, AcmeError> {
        self.ensure_supported(strategy)?;
        let missing = || AcmeError::MissingBackend {
            strategy: strategy.to_string(),
        };

        let solver = match strategy {
            ChallengeStrategy::Dns01 => {
                let api = self.dns.clone().ok_or_else(missing)?;
                let provider = Route53Provider::with_sync_policy(api, config.dns_poll);
                ChallengeSolver::Dns(DnsSolver::new(Arc::new(provider), domain))
            }
            ChallengeStrategy::Http01 => ChallengeSolver::Http(HttpSolver::new(
                domain,
                &challenge.token,
                config.http.clone(),
            )),
            ChallengeStrategy::BucketHttp01 => {
                let bucket = self.bucket.clone().ok_or_else(missing)?;
                ChallengeSolver::Bucket(BucketSolver::new(bucket, domain, &challenge.token))
            }
        };

        Ok(solver)
    }
}

/// Pick the challenge of `challenge_type` that is sufficient on its own
///
/// Combinations naming more than one challenge are refused outright.
pub fn find_challenge(
    authorization: &Authorization,
    challenge_type: &str,
) -> Result<Challenge, AcmeError> {
    let domain = &authorization.identifier.value;

    if let Some(combination) = authorization.combinations.iter().find(|c| c.len() != 1) {
        return Err(AcmeError::UnsupportedCombination {
            domain: domain.clone(),
            combination: combination.clone(),
        });
    }

    authorization
        .challenges
        .iter()
        .enumerate()
        .filter(|(_, challenge)| challenge.kind == challenge_type)
        .find(|(index, _)| {
            authorization
                .combinations
                .iter()
                .any(|combination| combination.as_slice() == [*index])
        })
        .map(|(_, challenge)| challenge.clone())
        .ok_or_else(|| AcmeError::NoChallengeFound {
            domain: domain.clone(),
            challenge_type: challenge_type.to_string(),
        })
}
