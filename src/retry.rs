use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use crate::error::ReconcilerError;

/// Fails with [`ReconcilerError::Timeout`] when `call` takes longer than `limit`.
pub async fn bounded<T, F>(
    operation: &'static str,
    limit: Duration,
    call: F,
) -> Result<T, ReconcilerError>
where
    F: Future<Output = Result<T, ReconcilerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ReconcilerError::Timeout {
            operation,
            after: limit,
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
            .with_jitter()
    }
}

/// Runs `call` until it succeeds, fails permanently, or the attempts run out.
///
/// Only errors for which [`ReconcilerError::is_transient`] holds are retried.
pub async fn with_retries<T, F, Fut>(
    operation: &'static str,
    policy: &RetryPolicy,
    call: F,
) -> Result<T, ReconcilerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ReconcilerError>>,
{
    call.retry(policy.backoff())
        .when(ReconcilerError::is_transient)
        .notify(|error: &ReconcilerError, delay: Duration| {
            warn!(operation, %error, ?delay, "call failed, retrying");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            min_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
        }
    }

    fn timeout() -> ReconcilerError {
        ReconcilerError::Timeout {
            operation: "GetItem",
            after: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), _> = bounded("GetItem", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        match result {
            Err(ReconcilerError::Timeout { operation, .. }) => assert_eq!(operation, "GetItem"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let result = bounded("GetItem", Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retries("GetItem", &instant(3), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(timeout())
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retries("GetItem", &instant(3), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(timeout())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retries("GetItem", &instant(3), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ReconcilerError::Config("bad".to_string()))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_attempt_policy_does_not_retry() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = RetryPolicy {
            max_attempts: 1,
            ..instant(1)
        };
        let result: Result<(), _> = with_retries("GetItem", &policy, move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(timeout())
        })
        .await;

        assert!(matches!(result, Err(ReconcilerError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_needs_at_least_one_attempt() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }
}
