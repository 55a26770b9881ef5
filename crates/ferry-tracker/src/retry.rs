//! Retry policy for per-fragment transfers.

use std::future::Future;
use std::time::Duration;

/// Fixed-count, fixed-delay retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    /// Ten attempts, eighteen seconds apart.
    fn default() -> Self {
        Self::fixed(10, Duration::from_secs(18))
    }
}

impl RetryPolicy {
    /// `max_attempts` tries with `delay` between them.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Execute an operation, retrying only errors `retryable` accepts.
    pub async fn execute_while<F, Fut, T, E, P>(&self, mut operation: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !retryable(&e) {
                        tracing::debug!(attempt, error = %e, "error is not retryable");
                        return Err(e);
                    }
                    if attempt >= self.max_attempts {
                        tracing::warn!(
                            attempt,
                            max_attempts = self.max_attempts,
                            error = %e,
                            "retry exhausted"
                        );
                        return Err(e);
                    }

                    tracing::debug!(
                        attempt,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "retrying after delay"
                    );

                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}
