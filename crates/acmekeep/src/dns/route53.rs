//! Route53-style challenge record management

use std::sync::Arc;

use tracing::{debug, info};

use super::{
    select_hosted_zone, Change, ChangeAction, ChangeBatch, ChangeStatus, HostedZone,
    HostedZoneApi, ResourceRecordSet,
};
use crate::error::{AcmeError, DnsProviderError};
use crate::poll::{PollPolicy, Poller};

/// TTL of the `_acme-challenge` TXT record, in seconds
pub const CHALLENGE_RECORD_TTL: u64 = 10;

/// Upper bound on hosted zone pages fetched per lookup
pub const MAX_ZONE_PAGES: usize = 1000;

/// Publishes and removes DNS-01 TXT records
pub struct Route53Provider {
    api: Arc<dyn HostedZoneApi>,
    sync_policy: PollPolicy,
}

impl std::fmt::Debug for Route53Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route53Provider")
            .field("sync_policy", &self.sync_policy)
            .finish_non_exhaustive()
    }
}

impl Route53Provider {
    pub fn new(api: Arc<dyn HostedZoneApi>) -> Self {
        Self::with_sync_policy(api, PollPolicy::dns())
    }

    pub fn with_sync_policy(api: Arc<dyn HostedZoneApi>, sync_policy: PollPolicy) -> Self {
        Self { api, sync_policy }
    }

    /// UPSERT the challenge record and wait for propagation
    pub async fn update(&self, domain: &str, value: &str) -> Result<(), AcmeError> {
        self.change(ChangeAction::Upsert, domain, value, "updated by acmekeep")
            .await
    }

    /// DELETE the challenge record and wait for propagation
    pub async fn remove(&self, domain: &str, value: &str) -> Result<(), AcmeError> {
        self.change(ChangeAction::Delete, domain, value, "deleted by acmekeep")
            .await
    }

    /// Most specific hosted zone for `domain` across all pages
    pub async fn find_hosted_zone(&self, domain: &str) -> Result<HostedZone, AcmeError> {
        let mut zones = Vec::new();
        let mut marker: Option<String> = None;

        for _ in 0..MAX_ZONE_PAGES {
            let page = self.api.list_hosted_zones(marker.as_deref()).await?;
            zones.extend(page.zones);

            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        let zone = select_hosted_zone(&zones, domain).cloned().ok_or_else(|| {
            DnsProviderError::NoHostedZone {
                domain: domain.to_string(),
            }
        })?;

        debug!(domain = %domain, zone = %zone.name, zone_id = %zone.id, "Selected hosted zone");
        Ok(zone)
    }

    /// Poll the change until the provider reports `INSYNC`
    pub async fn wait_until_in_sync(&self, domain: &str, change_id: &str) -> Result<(), AcmeError> {
        debug!(domain = %domain, change_id = %change_id, "Waiting for record change to be INSYNC");
        let mut poller = Poller::new(self.sync_policy);

        loop {
            let info = self.api.get_change(change_id).await?;
            debug!(change_id = %change_id, status = ?info.status, "Change status");

            if info.status == ChangeStatus::InSync {
                debug!(domain = %domain, attempts = poller.attempts() + 1, "Record change has been synced");
                return Ok(());
            }

            poller
                .tick()
                .await
                .map_err(|_| AcmeError::DnsPropagationTimeout {
                    domain: domain.to_string(),
                    change_id: change_id.to_string(),
                    timeout: self.sync_policy.timeout,
                })?;
        }
    }

    async fn change(
        &self,
        action: ChangeAction,
        domain: &str,
        value: &str,
        comment: &str,
    ) -> Result<(), AcmeError> {
        let zone = self.find_hosted_zone(domain).await?;
        let batch = ChangeBatch {
            comment: Some(comment.to_string()),
            changes: vec![Change {
                action,
                record_set: challenge_record_set(domain, value),
            }],
        };

        let info = self
            .api
            .change_resource_record_sets(&zone.id, &batch)
            .await?;
        info!(
            domain = %domain,
            action = action.as_str(),
            zone_id = %zone.id,
            change_id = %info.id,
            "Submitted challenge record change"
        );

        if info.status == ChangeStatus::InSync {
            return Ok(());
        }
        self.wait_until_in_sync(domain, &info.id).await
    }
}

/// Label validated by DNS-01
pub fn validation_label(domain: &str) -> String {
    format!("_acme-challenge.{}", domain.trim_end_matches('.'))
}

fn challenge_record_set(domain: &str, value: &str) -> ResourceRecordSet {
    ResourceRecordSet {
        name: validation_label(domain),
        record_type: "TXT".to_string(),
        ttl: CHALLENGE_RECORD_TTL,
        values: vec![format!("\"{value}\"")],
    }
}
