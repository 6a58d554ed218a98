/// Bounded retry with per-provider backoff policy
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{CollectError, Result};
use crate::utils::RateLimiter;

/// Retry policy for one provider: bounded attempts with a backoff ladder.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_secs: Vec<u64>,
    pub throttle_cooldown: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_secs: Vec<u64>, throttle_cooldown: Duration) -> Self {
        RetryPolicy {
            max_attempts,
            backoff_secs,
            throttle_cooldown,
        }
    }

    /// Backoff before retry number `attempt` (1-based). Past the end of the
    /// ladder, the last step repeats.
    fn backoff(&self, attempt: u32) -> Duration {
        let secs = self
            .backoff_secs
            .get(attempt.saturating_sub(1) as usize)
            .or(self.backoff_secs.last())
            .copied()
            .unwrap_or(8);
        Duration::from_secs(secs)
    }
}

/// Run `op` through the provider's rate limiter with bounded retries.
///
/// Throttling (HTTP 429) penalizes the limiter and retries the same request
/// without consuming an attempt. Recoverable errors back off and retry up to
/// `max_attempts`; anything else returns immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    limiter: &RateLimiter,
    op_name: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        limiter.acquire().await;

        match op().await {
            Ok(value) => return Ok(value),
            Err(CollectError::Throttled { retry_after_secs }) => {
                let cooldown = if retry_after_secs > 0 {
                    Duration::from_secs(retry_after_secs)
                } else {
                    policy.throttle_cooldown
                };
                warn!(
                    "{}: throttled by provider, backing off {}s",
                    op_name,
                    cooldown.as_secs()
                );
                limiter.penalize(cooldown).await;
                // Throttling is not a failure: no attempt consumed
            }
            Err(e) if e.is_recoverable() && attempt + 1 < policy.max_attempts => {
                attempt += 1;
                let backoff = policy.backoff(attempt);
                warn!(
                    "{}: attempt {}/{} failed ({}), retrying in {}s",
                    op_name,
                    attempt,
                    policy.max_attempts,
                    e,
                    backoff.as_secs()
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
