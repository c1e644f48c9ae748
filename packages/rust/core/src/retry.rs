//! Bounded retries with exponential backoff for external stage calls.
//!
//! Every call is wrapped in a per-call timeout, and no attempt or backoff
//! sleep is started past the run deadline. Non-transient errors are returned
//! immediately.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::exponential::ExponentialBackoff;
use tokio::time::Instant;
use tracing::{debug, warn};

use feeddigest_shared::{ExternalFailureKind, FeedDigestError, Result, RetryConfig};

/// Retry and timeout limits for one stage's external calls.
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub retry: RetryConfig,
    pub call_timeout: Duration,
    /// Absolute run deadline; nothing starts after it.
    pub deadline: Instant,
}

impl CallPolicy {
    fn backoff(&self) -> ExponentialBackoff<backoff::SystemClock> {
        ExponentialBackoff {
            current_interval: self.retry.initial_backoff,
            initial_interval: self.retry.initial_backoff,
            max_interval: self.retry.max_backoff,
            multiplier: self.retry.multiplier,
            randomization_factor: 0.1,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Run `call` until it succeeds, the retry budget is spent, or the run
/// deadline is reached.
///
/// `stage` and `batch` only label log events and the timeout error.
pub async fn call_with_retry<T, F, Fut>(
    policy: &CallPolicy,
    stage: &'static str,
    batch: usize,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.backoff();
    let mut attempt: u32 = 0;

    loop {
        let now = Instant::now();
        if now >= policy.deadline {
            return Err(FeedDigestError::external(
                stage,
                ExternalFailureKind::Timeout,
                "run deadline reached before the call started",
            ));
        }

        let limit = (now + policy.call_timeout).min(policy.deadline);
        let err = match tokio::time::timeout_at(limit, call()).await {
            Ok(Ok(value)) => {
                if attempt > 0 {
                    debug!(stage, batch, attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Ok(Err(e)) if e.is_transient() => e,
            Ok(Err(e)) => return Err(e),
            Err(_) => FeedDigestError::external(
                stage,
                ExternalFailureKind::Timeout,
                format!("no response within {}s", policy.call_timeout.as_secs_f32()),
            ),
        };

        if attempt >= policy.retry.max_retries {
            return Err(err);
        }

        let delay = backoff.next_backoff().unwrap_or(policy.retry.max_backoff);
        if Instant::now() + delay >= policy.deadline {
            warn!(stage, batch, error = %err, "run deadline leaves no room for another attempt");
            return Err(err);
        }

        attempt += 1;
        warn!(
            stage,
            batch,
            attempt,
            max_retries = policy.retry.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "external call failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
