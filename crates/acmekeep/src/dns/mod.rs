//! DNS hosting provider integration for DNS-01
//!
//! [`HostedZoneApi`] is the provider boundary (zone listing, change batches,
//! change status), implemented over the Route53 REST API by [`Route53Client`].
//! [`Route53Provider`] builds the challenge record changes on top of it and
//! blocks until the provider reports them `INSYNC`.

mod aws;
mod route53;

pub use aws::{
    AwsCredentials, Route53Client, SigV4Signer, SignableRequest, ENV_ACCESS_KEY_ID,
    ENV_SECRET_ACCESS_KEY, ENV_SESSION_TOKEN, ROUTE53_ENDPOINT,
};
pub use route53::{validation_label, Route53Provider, CHALLENGE_RECORD_TTL, MAX_ZONE_PAGES};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DnsProviderError;

/// Administrative container for a domain's records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedZone {
    pub id: String,
    /// Fully qualified, usually with the trailing dot (`example.com.`)
    pub name: String,
}

/// One page of `ListHostedZones`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostedZonePage {
    pub zones: Vec<HostedZone>,
    /// Marker for the next page; `None` on the last page
    pub next_marker: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeAction {
    Upsert,
    Delete,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Upsert => "UPSERT",
            ChangeAction::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub ttl: u64,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub action: ChangeAction,
    pub record_set: ResourceRecordSet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeBatch {
    #[serde(default)]
    pub comment: Option<String>,
    pub changes: Vec<Change>,
}

/// Propagation status of a submitted change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeStatus {
    Pending,
    #[serde(rename = "INSYNC")]
    InSync,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInfo {
    pub id: String,
    pub status: ChangeStatus,
}

/// DNS hosting provider API surface used by [`Route53Provider`]
#[async_trait]
pub trait HostedZoneApi: Send + Sync {
    /// One page of hosted zones, starting at `marker`
    async fn list_hosted_zones(
        &self,
        marker: Option<&str>,
    ) -> Result<HostedZonePage, DnsProviderError>;

    /// Submit a change batch against a zone
    async fn change_resource_record_sets(
        &self,
        zone_id: &str,
        batch: &ChangeBatch,
    ) -> Result<ChangeInfo, DnsProviderError>;

    /// Current status of a submitted change
    async fn get_change(&self, change_id: &str) -> Result<ChangeInfo, DnsProviderError>;
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Most specific zone whose name is a label suffix of `domain`
///
/// Zones of equal length are resolved in favour of the later one.
pub fn select_hosted_zone<'a>(zones: &'a [HostedZone], domain: &str) -> Option<&'a HostedZone> {
    let domain = normalize(domain);
    let mut selected: Option<(&HostedZone, usize)> = None;

    for zone in zones {
        let name = normalize(&zone.name);
        let matches = domain == name
            || domain
                .strip_suffix(name.as_str())
                .is_some_and(|head| head.ends_with('.'));
        if !matches {
            continue;
        }

        match selected {
            Some((_, len)) if name.len() < len => {}
            _ => selected = Some((zone, name.len())),
        }
    }

    selected.map(|(zone, _)| zone)
}
