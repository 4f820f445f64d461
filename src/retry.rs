//! Waiting on the outside world: retries for flaky commands and bounded
//! polling for readiness checks.
//!
//! - [`retry_transient`] re-runs a command whose failure may be transient
//!   (`terraform init` downloading providers) within an attempt budget,
//!   sleeping a jittered, doubling delay between attempts. Only
//!   [`Error::Apply`] counts as transient; a timeout or a configuration
//!   problem is returned at once.
//! - [`poll_until`] checks a predicate at a fixed interval until it holds or
//!   a deadline passes. The deadline also bounds each check, so a check that
//!   never completes still ends in [`Error::Timeout`].
//!
//! # Example
//!
//! ```ignore
//! use tfp_forge::retry::{poll_until, PollPolicy};
//!
//! let client = poll_until(&PollPolicy::default(), "management client", || async {
//!     Ok(connect().await.ok())
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Attempt budget and delay growth for retried commands
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts including the first; never less than one
    pub attempts: u32,
    /// Delay after the first failure
    pub base: Duration,
    /// Upper bound on any single delay
    pub cap: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_secs(2),
            cap: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// `attempts` tries with the default delays
    pub fn attempts(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    /// Nominal delay after `failures` consecutive failures
    ///
    /// Doubles from `base` on each failure and stops growing at `cap`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(31);
        self.base.saturating_mul(1 << doublings).min(self.cap)
    }

    fn exhausted(&self, failures: u32) -> bool {
        failures >= self.attempts.max(1)
    }
}

/// Run `operation` until it succeeds, fails for a non-transient reason or
/// uses up the attempt budget
///
/// The error of the last attempt is returned unchanged.
pub async fn retry_transient<F, Fut, T>(backoff: &Backoff, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failures = 0u32;
    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        failures += 1;

        if !matches!(err, Error::Apply(_)) || backoff.exhausted(failures) {
            warn!(what = %what, failures, error = %err, "giving up");
            return Err(err);
        }

        // somewhere between half and all of the nominal delay
        let delay = backoff
            .delay_after(failures)
            .mul_f64(rand::thread_rng().gen_range(0.5..=1.0));
        debug!(what = %what, failures, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
        tokio::time::sleep(delay).await;
    }
}

/// Fixed-interval polling bounded by a deadline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between checks
    pub interval: Duration,
    /// Total time allowed before giving up
    pub deadline: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            deadline: Duration::from_secs(300),
        }
    }
}

impl PollPolicy {
    /// Create a policy with the given interval and deadline
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }
}

/// Poll `check` until it yields `Some(value)` or the policy deadline passes.
///
/// `check` returning `Ok(None)` means "not ready yet"; an `Err` aborts the
/// poll immediately. The check is always attempted at least once, and a
/// check still running when the deadline passes is dropped.
pub async fn poll_until<F, Fut, T>(policy: &PollPolicy, what: &str, mut check: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    let expired = |attempts: u32| {
        warn!(what = %what, attempts, deadline = ?policy.deadline, "poll deadline exceeded");
        Error::timeout(format!(
            "{} not ready after {:?} ({} attempts)",
            what, policy.deadline, attempts
        ))
    };

    loop {
        attempts += 1;
        let remaining = policy.deadline.saturating_sub(start.elapsed());
        match tokio::time::timeout(remaining, check()).await {
            Ok(outcome) => {
                if let Some(value) = outcome? {
                    debug!(what = %what, attempts, "poll condition satisfied");
                    return Ok(value);
                }
            }
            Err(_) => return Err(expired(attempts)),
        }

        if start.elapsed() + policy.interval > policy.deadline {
            return Err(expired(attempts));
        }

        tokio::time::sleep(policy.interval).await;
    }
}
