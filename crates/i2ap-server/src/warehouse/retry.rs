//! Bounded retry for warehouse calls

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use super::WarehouseError;

/// Default number of attempts per statement
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Default pause between attempts
pub const DEFAULT_DELAY_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: Duration::from_secs(DEFAULT_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, for callers that handle failure themselves
    pub fn once() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, WarehouseError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WarehouseError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(
                    "{} attempt {}/{} failed: {}. Retrying in {:?}...",
                    operation, attempt, attempts, e, policy.delay
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            },
            Err(e) => {
                return Err(WarehouseError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts,
                    last_error: e.to_string(),
                });
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry("exec", &fast(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(WarehouseError::UnsupportedQuery("flaky".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_wraps_last_error() {
        let calls = AtomicU32::new(0);
        let err = with_retry("exec", &fast(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(WarehouseError::UnsupportedQuery("still down".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            WarehouseError::RetriesExhausted {
                operation,
                attempts,
                last_error,
            } => {
                assert_eq!(operation, "exec");
                assert_eq!(attempts, 3);
                assert!(last_error.contains("still down"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _ = with_retry("query", &fast(0), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, WarehouseError>(())
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
