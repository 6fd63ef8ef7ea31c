//! Bounded exponential backoff for transient network failures.
//!
//! Shared by the mailbox reader, classifier client, and notification
//! sender. Parse-level failures are never routed through here — callers
//! pass a `retryable` predicate when some errors must fail fast.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Retry policy: attempt count plus a doubling delay with a cap.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(60),
        }
    }

    /// Delay before the retry following `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

/// Run `op` until it succeeds, the attempt budget is exhausted, or an error
/// fails the `retryable` predicate. The final error is returned as-is.
pub async fn with_backoff_if<T, E, F, Fut, P>(
    policy: &BackoffPolicy,
    what: &str,
    retryable: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts && retryable(&e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "{what} failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Retry every error until the attempt budget runs out.
pub async fn with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    what: &str,
    op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_backoff_if(policy, what, |_| true, op).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn delays_double_up_to_cap() {
        let policy = BackoffPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(4),
            max_delay: Duration::from_secs(10),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(2), Duration::from_secs(8));
        assert_eq!(policy.delay_for(3), Duration::from_secs(10));
        assert_eq!(policy.delay_for(10), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = BackoffPolicy::new(3, Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = with_backoff(&policy, "test op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let policy = BackoffPolicy::new(3, Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = with_backoff(&policy, "test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("still down".to_string()) }
        })
        .await;

        assert_eq!(result, Err("still down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let policy = BackoffPolicy::new(5, Duration::ZERO);
        let calls = AtomicU32::new(0);

        let result: Result<(), String> =
            with_backoff_if(&policy, "test op", |e: &String| e != "fatal", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
