use crate::error::OverwatchResult;
use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{info, warn};

/// Bounded exponential backoff applied to transient infrastructure failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub backoff_base_ms: u64,
    /// Maximum delay in milliseconds (cap for exponential backoff).
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 100,
            backoff_max_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that never waits; used in tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `backoff_max_ms`.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let delay = self
            .backoff_base_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        delay.min(self.backoff_max_ms)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the retry
/// budget is exhausted. The last error is returned on exhaustion.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    mut op: F,
) -> OverwatchResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = OverwatchResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                let delay = policy.backoff_ms(attempt);
                info!(op = op_name, attempt, delay_ms = delay, error = %e, "Transient failure, backing off");
                if delay > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    warn!(op = op_name, attempts = attempt + 1, error = %e, "Retry budget exhausted");
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::OverwatchError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
        };
        assert_eq!(policy.backoff_ms(0), 100);
        assert_eq!(policy.backoff_ms(2), 400);
        assert_eq!(policy.backoff_ms(8), 1_000);
        assert_eq!(policy.backoff_ms(60), 1_000);
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&RetryPolicy::immediate(3), "persist", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(OverwatchError::Store("timeout".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: OverwatchResult<()> =
            retry_with_backoff(&RetryPolicy::immediate(3), "persist", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OverwatchError::Validation("bad".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: OverwatchResult<()> =
            retry_with_backoff(&RetryPolicy::immediate(2), "persist", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OverwatchError::Store("down".into())) }
            })
            .await;
        assert!(matches!(result, Err(OverwatchError::Store(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
