//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

/// Retry budget and backoff base for [`with_retry`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    /// The delay before retry `n` (1-based) is `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 2s, 4s, 8s: the AniList lookup budget.
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Run `op` until it succeeds, the retry budget is exhausted, or it fails
/// with an error `is_retryable` rejects. Returns the final error as-is.
pub async fn with_retry<T, E, F, Fut>(
    policy: RetryPolicy,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if !is_retryable(&error) => return Err(error),
            Err(error) if attempt >= policy.max_retries => {
                tracing::error!(attempts = attempt + 1, %error, "retry budget exhausted");
                return Err(error);
            }
            Err(error) => {
                attempt += 1;
                let delay = policy.base_delay * 2u32.pow(attempt);
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "retrying after backoff"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
