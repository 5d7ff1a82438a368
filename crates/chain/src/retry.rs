//! Bounded retry and deadlines for RPC calls.

use std::future::{Future, IntoFuture};
use std::time::Duration;
use tracing::warn;

use crate::error::ChainError;
use crate::scheduler::Scheduler;

/// Exponential backoff for transient RPC failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub attempts: u32,
    /// Delay before the second attempt; doubles afterwards.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1).min(16))
    }
}

/// Run `op` until it succeeds, fails non-transiently, or attempts run out.
///
/// Only [`ChainError::is_transient`] failures are retried. The last error is
/// returned once the policy is exhausted.
pub async fn retry_rpc<T, F, Fut>(
    scheduler: &dyn Scheduler,
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation = operation,
                    attempt = attempt,
                    delay_ms = delay.as_millis(),
                    error = %e,
                    "RPC call failed, retrying"
                );
                scheduler.sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Apply a deadline to an RPC future, mapping its error into [`ChainError`].
pub async fn with_timeout<T, E, Fut>(
    operation: &'static str,
    limit: Duration,
    fut: Fut,
) -> Result<T, ChainError>
where
    E: Into<ChainError>,
    Fut: IntoFuture<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ChainError::Timeout {
            operation,
            elapsed_ms: limit.as_millis(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let scheduler = ManualScheduler::new(0);
        let calls = AtomicU32::new(0);

        let result = retry_rpc(&scheduler, &RetryPolicy::default(), "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ChainError::RpcTransient("connection reset".into()))
            } else {
                Ok(7u64)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            scheduler.sleeps(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let scheduler = ManualScheduler::new(0);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_rpc(&scheduler, &RetryPolicy::default(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ChainError::Timeout {
                operation: "eth_call",
                elapsed_ms: 10,
            })
        })
        .await;

        assert!(matches!(result, Err(ChainError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let scheduler = ManualScheduler::new(0);
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = retry_rpc(&scheduler, &RetryPolicy::default(), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ChainError::RpcFatal("execution reverted".into()))
        })
        .await;

        assert!(matches!(result, Err(ChainError::RpcFatal(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(scheduler.sleeps().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_maps_elapsed_deadline() {
        let result: Result<(), ChainError> = with_timeout(
            "eth_blockNumber",
            Duration::from_secs(5),
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<(), ChainError>(())
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(ChainError::Timeout {
                operation: "eth_blockNumber",
                elapsed_ms: 5_000
            })
        ));
    }
}
