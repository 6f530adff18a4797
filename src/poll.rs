//! Fixed-interval polling of asynchronous backend state.
//!
//! The backend acknowledges most mutations before it has finished them. A
//! poll sleeps for one interval, asks the probe for the current state, and
//! stops once the probe reports a result or the limit is reached.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::error::ProviderError;

/// Interval between two polls of the same object.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Poll ceiling for bounded waits (volume update, attachment removal).
pub const DEFAULT_MAX_POLLS: u32 = 100;

/// Upper bound on waits that have no poll ceiling (host and volume delete).
pub const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Overrides [`DEFAULT_POLL_INTERVAL`], in whole seconds.
pub const ENV_POLL_INTERVAL: &str = "HPEGL_METAL_POLL_INTERVAL_SECS";

/// Timing used by every wait in the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Sleep between polls.
    pub interval: Duration,
    /// Poll ceiling for bounded waits.
    pub max_polls: u32,
    /// Deadline for delete waits.
    pub delete_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
        }
    }
}

impl PollSettings {
    /// Defaults, with the interval taken from the environment when set.
    pub fn from_env() -> Self {
        let interval = std::env::var(ENV_POLL_INTERVAL)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        Self {
            interval,
            ..Self::default()
        }
    }

    /// A limit of [`PollSettings::max_polls`] attempts.
    pub fn bounded(&self) -> Limit {
        Limit::Attempts(self.max_polls)
    }

    /// A limit of [`PollSettings::delete_timeout`].
    pub fn until_deleted(&self) -> Limit {
        Limit::Deadline(self.delete_timeout)
    }
}

/// What a probe observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The wait is over.
    Done(T),
    /// Keep polling.
    Pending,
}

/// When to give up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// After this many probes.
    Attempts(u32),
    /// Once this much time has passed since the wait started.
    Deadline(Duration),
}

/// Poll `probe` every `interval` until it returns [`Probe::Done`].
///
/// The first probe runs after one interval. Probe errors end the wait
/// immediately. When `limit` is reached the wait fails with
/// `waiting for <what> has timed out`.
pub async fn poll_until<T, F, Fut>(
    interval: Duration,
    limit: Limit,
    what: &str,
    mut probe: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, ProviderError>>,
{
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        sleep(interval).await;
        attempts += 1;

        if let Probe::Done(value) = probe().await? {
            return Ok(value);
        }

        let exhausted = match limit {
            Limit::Attempts(max) => attempts >= max,
            Limit::Deadline(deadline) => started.elapsed() >= deadline,
        };
        if exhausted {
            return Err(ProviderError::Timeout(format!("waiting for {} has timed out", what)));
        }
        debug!(what, attempts, "Still waiting");
    }
}
