//! Retry with exponential backoff for idempotent network calls.
//!
//! ## Design
//! - One policy object, [`RetryPolicy`], shared by datastore and
//!   translation calls.
//! - [`with_backoff`] drives an async closure: on a retryable failure it
//!   sleeps `base_delay * 2^attempt + random(0, max_jitter)` and tries
//!   again, up to `max_attempts` total attempts.
//! - HTTP 429 and transport errors are always retryable. Other 4xx
//!   responses are retried only while `retry_client_errors` is set. That
//!   default is deliberately permissive — some free translation APIs
//!   misreport rate limits as plain 4xx — but retrying client errors is
//!   usually wrong, so the flag exists to turn it off per deployment.
//!
//! Callers are expected to hand in idempotent operations (reads,
//! path-scoped writes, translate). Nothing here guards against replaying a
//! non-idempotent call.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{RequestError, RetryError};

/// Backoff parameters for [`with_backoff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempt budget, including the first try. At least one attempt
    /// is always made.
    pub max_attempts: u32,
    /// Base wait before the first retry; doubles on each further retry.
    pub base_delay: Duration,
    /// Upper bound of the uniform random jitter added to every wait.
    pub max_jitter: Duration,
    /// Retry 4xx responses other than 429. Deliberate relaxation, see the
    /// module docs.
    pub retry_client_errors: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
            retry_client_errors: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps — handy in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
            retry_client_errors: true,
        }
    }

    fn should_retry(&self, err: &RequestError) -> bool {
        if err.is_rate_limited() {
            return true;
        }
        if err.is_client_error() {
            return self.retry_client_errors;
        }
        true
    }

    /// Wait before the retry following failed attempt number `attempt`
    /// (zero-based). The exponential part is deterministic; the jitter is
    /// uniform in `[0, max_jitter)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        // Cap the shift so a misconfigured attempt count cannot overflow.
        let exp = self.base_delay.saturating_mul(1u32 << attempt.min(16));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return exp;
        }
        exp + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

/// Run `op` under `policy`, retrying transient failures with exponential
/// backoff.
///
/// # Returns
/// - `Ok(value)` — as soon as any attempt succeeds.
/// - `Err(RetryError::Fatal)` — immediately, when the policy classifies
///   the failure as non-retryable. No sleep is applied.
/// - `Err(RetryError::Exhausted)` — after `max_attempts` failed attempts,
///   wrapping the last underlying error.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !policy.should_retry(&err) {
                    return Err(RetryError::Fatal(err));
                }
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Exhausted { attempts: attempt, last: err });
                }
                let delay = policy.backoff_delay(attempt - 1);
                warn!(
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
