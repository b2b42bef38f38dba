//! Fixed-interval polling with an overall deadline
//!
//! Challenge status, certificate readiness and DNS propagation are all
//! "check, sleep, check again until a terminal status or the deadline". The
//! check stays in the caller's loop (it usually needs `&mut` access to a
//! client); [`Poller::tick`] owns the sleeping and the deadline.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::trace;

/// Interval and overall deadline of one polling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Sleep between two status checks
    #[serde(with = "crate::config::duration_secs")]
    pub interval: Duration,
    /// Overall deadline, measured from the first status check
    #[serde(with = "crate::config::duration_secs")]
    pub timeout: Duration,
}

impl PollPolicy {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Challenge status: every 5 seconds for up to 5 minutes
    pub const fn challenge() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(5 * 60))
    }

    /// Certificate readiness: every 5 seconds for up to 3 minutes
    pub const fn certificate() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(3 * 60))
    }

    /// DNS change propagation: every 5 seconds for up to 30 minutes
    pub const fn dns() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(30 * 60))
    }
}

/// Deadline exceeded while polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTimeout {
    pub elapsed: Duration,
    pub attempts: u32,
}

/// Tracks one polling loop
///
/// ```ignore
/// let mut poller = Poller::new(PollPolicy::challenge());
/// loop {
///     match fetch_status().await? {
///         Status::Valid => return Ok(()),
///         Status::Pending => {}
///     }
///     poller.tick().await.map_err(|_| timeout_error())?;
/// }
/// ```
#[derive(Debug)]
pub struct Poller {
    policy: PollPolicy,
    started: Instant,
    attempts: u32,
}

impl Poller {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            started: Instant::now(),
            attempts: 0,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Number of status checks that ended in `tick`
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wait for the next status check
    ///
    /// Returns `Err` instead of sleeping once the deadline has passed, and
    /// also when the deadline passes during the sleep.
    pub async fn tick(&mut self) -> Result<(), PollTimeout> {
        self.attempts += 1;

        if self.started.elapsed() >= self.policy.timeout {
            return Err(self.timeout());
        }

        trace!(
            attempt = self.attempts,
            interval_ms = self.policy.interval.as_millis() as u64,
            "Sleeping before next poll"
        );
        tokio::time::sleep(self.policy.interval).await;

        if self.started.elapsed() >= self.policy.timeout {
            return Err(self.timeout());
        }
        Ok(())
    }

    fn timeout(&self) -> PollTimeout {
        PollTimeout {
            elapsed: self.started.elapsed(),
            attempts: self.attempts,
        }
    }
}
