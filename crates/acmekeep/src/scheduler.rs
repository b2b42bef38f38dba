//! Certificate renewal scheduler
//!
//! Walks the inventory and re-runs issuance for every certificate whose
//! NotAfter falls inside the renewal horizon. Renewals run one after another,
//! so a single process never issues the same Common Name twice at once.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::AcmeError;
use crate::service::{
    Agent, InventoryEntry, InventoryService, IssueOptions, IssueOutcome, IssueRequest,
    IssueService,
};

/// Minimum interval between two passes (1 hour)
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

/// Result of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenewalReport {
    pub checked: usize,
    pub renewed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct RenewalScheduler {
    agent: Arc<Agent>,
    options: IssueOptions,
    check_interval: Duration,
}

impl RenewalScheduler {
    pub fn new(agent: Arc<Agent>, options: IssueOptions) -> Self {
        Self {
            agent,
            options,
            check_interval: Duration::from_secs(12 * 3600),
        }
    }

    /// Set the interval of [`run`](Self::run), clamped to at least one hour
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    pub fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Check periodically until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            check_interval_secs = self.check_interval.as_secs(),
            "Starting certificate renewal scheduler"
        );

        let mut ticker = interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            debug!("Running scheduled certificate renewal check");
            if let Err(e) = self.check_renewals().await {
                error!(error = %e, "Certificate renewal check failed");
            }
        }

        info!("Certificate renewal scheduler stopped");
    }

    /// One pass over the inventory
    pub async fn check_renewals(&self) -> Result<RenewalReport, AcmeError> {
        let inventory =
            InventoryService::new(self.agent.blob_store().clone(), self.agent.config().layout);
        let entries = inventory.list().await?;

        let now = Utc::now();
        let horizon = self.agent.config().renew_before();
        let mut report = RenewalReport {
            checked: entries.len(),
            ..RenewalReport::default()
        };

        info!(certificates = entries.len(), "Checking certificates for renewal");

        for entry in entries {
            if !entry.needs_renewal(now, horizon) {
                debug!(domain = %entry.domain, not_after = %entry.certificate.not_after, "Certificate is still valid");
                continue;
            }

            info!(
                email = %entry.email,
                domain = %entry.domain,
                not_after = %entry.certificate.not_after,
                "Certificate needs renewal"
            );

            let start = Instant::now();
            match self.renew(&entry).await {
                Ok(_) => {
                    info!(
                        domain = %entry.domain,
                        elapsed_secs = start.elapsed().as_secs(),
                        "Certificate renewed successfully"
                    );
                    report.renewed.push(entry.domain);
                }
                Err(e) => {
                    // Continue with the other certificates
                    error!(domain = %entry.domain, error = %e, "Certificate renewal failed");
                    report.failed.push((entry.domain, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    async fn renew(&self, entry: &InventoryEntry) -> Result<IssueOutcome, AcmeError> {
        let store = self.agent.store(&entry.email)?;
        let mut client = self.agent.connect(&store).await?;

        let sans = entry
            .certificate
            .san
            .iter()
            .filter(|name| **name != entry.domain)
            .cloned()
            .collect();
        let request = IssueRequest::new(entry.domain.as_str()).with_sans(sans);

        IssueService::new(&self.agent)
            .issue(&mut client, &store, &request, self.options)
            .await
    }
}

impl std::fmt::Debug for RenewalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalScheduler")
            .field("check_interval", &self.check_interval)
            .field("options", &self.options)
            .finish()
    }
}
