//! Exponential backoff for broker calls.

use std::future::Future;
use std::time::Duration;

use daily_short_fivepaisa::BrokerError;
use tracing::warn;

/// Backoff of `base × 2^failures`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
    /// Failures tolerated before giving up (0 = unlimited).
    max_attempts: u32,
    failures: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
            failures: 0,
        }
    }

    /// Unlimited retries, as for the monitoring loop.
    #[must_use]
    pub const fn unbounded(base: Duration, max_delay: Duration) -> Self {
        Self::new(base, max_delay, 0)
    }

    /// Records a failure and returns how long to wait before the next
    /// attempt, or `None` once the attempt budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts > 0 && self.failures >= self.max_attempts {
            return None;
        }
        self.failures += 1;

        let factor = 2u32.checked_pow(self.failures).unwrap_or(u32::MAX);
        let delay = self
            .base
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        Some(delay)
    }

    /// [`Backoff::next_delay`], stretched to any wait the broker asked for
    /// in `err`.
    pub fn delay_after(&mut self, err: &BrokerError) -> Option<Duration> {
        let delay = self.next_delay()?;
        Some(err.retry_after().map_or(delay, |wait| wait.max(delay)))
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }
}

/// Runs `op`, retrying transient broker failures per `backoff`.
///
/// Non-transient errors return immediately; so does the last transient
/// error once the budget is spent.
pub async fn retry_transient<T, F, Fut>(
    what: &str,
    mut backoff: Backoff,
    mut op: F,
) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => match backoff.delay_after(&e) {
                Some(delay) => {
                    warn!(
                        what,
                        error = %e,
                        attempt = backoff.failures(),
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}
