//! Stored certificate inspection and renewal policy

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::{FromDer, X509Certificate};

use crate::error::AcmeError;

/// Default renewal horizon in days
pub const DEFAULT_RENEW_BEFORE_DAYS: u32 = 30;

/// Facts read from the leaf of a stored PEM bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateInfo {
    pub not_before: DateTime<Utc>,
    /// Expiry; renewal is due once it falls inside the horizon
    pub not_after: DateTime<Utc>,
    /// Subject CN, when the subject has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    /// DNS names of the subject alternative name extension
    pub san: Vec<String>,
}

impl CertificateInfo {
    /// Parse the first certificate of a PEM bundle
    pub fn from_pem(pem: &str) -> Result<Self, AcmeError> {
        let (_, pem) = parse_x509_pem(pem.as_bytes())
            .map_err(|e| AcmeError::Certificate(format!("failed to parse PEM: {e}")))?;
        let (_, cert) = X509Certificate::from_der(&pem.contents)
            .map_err(|e| AcmeError::Certificate(format!("failed to parse certificate: {e}")))?;

        let validity = cert.validity();
        let not_before = timestamp(validity.not_before.timestamp())?;
        let not_after = timestamp(validity.not_after.timestamp())?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let san = cert
            .subject_alternative_name()
            .map_err(|e| AcmeError::Certificate(format!("invalid subjectAltName: {e}")))?
            .map(|ext| {
                ext.value
                    .general_names
                    .iter()
                    .filter_map(|name| match name {
                        GeneralName::DNSName(dns) => Some(dns.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            not_before,
            not_after,
            common_name,
            san,
        })
    }

    pub fn needs_renewal(&self, now: DateTime<Utc>, horizon: Duration) -> bool {
        needs_renewal(self.not_after, now, horizon)
    }
}

/// Due for renewal when `not_after` falls inside `now + horizon`
pub fn needs_renewal(not_after: DateTime<Utc>, now: DateTime<Utc>, horizon: Duration) -> bool {
    not_after < now + horizon
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, AcmeError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| AcmeError::Certificate(format!("timestamp {secs} out of range")))
}
