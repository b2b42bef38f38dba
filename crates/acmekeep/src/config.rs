//! Agent configuration
//!
//! Loaded from an optional JSON file, then overridden by the environment
//! (`ACMEKEEP_DIRECTORY_URL`, `ACMEKEEP_HTTP_PORT`) and finally by CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::certificate::DEFAULT_RENEW_BEFORE_DAYS;
use crate::challenge::{ChallengeStrategy, HttpSolverOptions};
use crate::error::ConfigError;
use crate::poll::PollPolicy;
use crate::protocol::ClientOptions;
use crate::storage::StoreLayout;

/// Let's Encrypt staging directory (resource-based ACME)
pub const DEFAULT_DIRECTORY_URL: &str = "https://acme-staging.api.letsencrypt.org/directory";

pub const ENV_DIRECTORY_URL: &str = "ACMEKEEP_DIRECTORY_URL";
pub const ENV_HTTP_PORT: &str = "ACMEKEEP_HTTP_PORT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// ACME directory of the CA
    pub directory_url: String,
    /// Root of the filesystem blob store
    pub data_dir: PathBuf,
    /// Key prefix and key encoding of the store
    pub layout: StoreLayout,
    /// Default way of proving domain control
    pub strategy: ChallengeStrategy,
    /// Local HTTP-01 listener
    pub http: HttpSolverOptions,
    /// Renew certificates expiring within this many days
    pub renew_before_days: u32,
    /// Wait for a submitted challenge to turn `valid`
    pub challenge_poll: PollPolicy,
    /// Wait for the CA to produce a requested certificate
    pub certificate_poll: PollPolicy,
    /// Wait for a DNS record change to become `INSYNC`
    pub dns_poll: PollPolicy,
    /// Overall deadline of one authorization, cleanup excluded
    #[serde(with = "duration_secs")]
    pub authorize_timeout: Duration,
    /// Per-request HTTP timeout towards the CA
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            data_dir: PathBuf::from("."),
            layout: StoreLayout::default(),
            strategy: ChallengeStrategy::default(),
            http: HttpSolverOptions::default(),
            renew_before_days: DEFAULT_RENEW_BEFORE_DAYS,
            challenge_poll: PollPolicy::challenge(),
            certificate_poll: PollPolicy::certificate(),
            dns_poll: PollPolicy::dns(),
            authorize_timeout: Duration::from_secs(45 * 60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl AgentConfig {
    /// Load a JSON configuration file; absent fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)?;

        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Apply `ACMEKEEP_*` overrides from the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_DIRECTORY_URL).filter(|v| !v.is_empty()) {
            debug!(directory_url = %url, "Directory URL overridden from environment");
            self.directory_url = url;
        }

        if let Some(port) = lookup(ENV_HTTP_PORT).filter(|v| !v.is_empty()) {
            self.http.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                name: ENV_HTTP_PORT,
                value: port.clone(),
            })?;
            debug!(port = self.http.port, "HTTP challenge port overridden from environment");
        }

        Ok(())
    }

    pub fn renew_before(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.renew_before_days))
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            challenge_poll: self.challenge_poll,
            certificate_poll: self.certificate_poll,
            request_timeout: self.request_timeout,
        }
    }
}

/// `Duration` as (fractional) seconds in configuration files
pub(crate) mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
