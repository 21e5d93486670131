//! Fixed-delay retry helper
//!
//! Lock contention on the session directory clears once a short-lived external
//! process exits, so attempts are spaced by a constant delay rather than an
//! exponential one.

use std::future::Future;
use std::time::Duration;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

/// Outcome of a retried operation that did not succeed.
#[derive(Debug)]
pub struct RetryError<E> {
    /// The last error observed.
    pub error: E,
    /// Attempts actually made.
    pub attempts: u32,
    /// True when the loop stopped because `max_attempts` was reached on a
    /// retryable error; false when a non-retryable error aborted it.
    pub exhausted: bool,
}

/// Run `op` until it succeeds, `check` rejects the error, or the attempt budget
/// runs out.
pub async fn retry_with_check<T, E, F, Fut, C>(
    config: RetryConfig,
    mut op: F,
    check: C,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !check(&error) {
                    return Err(RetryError {
                        error,
                        attempts: attempt,
                        exhausted: false,
                    });
                }
                if attempt >= max_attempts {
                    return Err(RetryError {
                        error,
                        attempts: attempt,
                        exhausted: true,
                    });
                }
                tracing::warn!(
                    "Attempt {}/{} failed: {}. Retrying in {}ms...",
                    attempt,
                    max_attempts,
                    error,
                    config.delay.as_millis()
                );
                tokio::time::sleep(config.delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_succeeds_after_retryable_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = retry_with_check(
            fast(3),
            move |_| {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err("busy") } else { Ok(n) }
                }
            },
            |e: &&str| *e == "busy",
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_aborts_immediately() {
        let result: Result<(), _> =
            retry_with_check(fast(5), |_| async { Err("denied") }, |e: &&str| *e == "busy").await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(!err.exhausted);
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let result: Result<(), _> =
            retry_with_check(fast(2), |_| async { Err("busy") }, |_: &&str| true).await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(err.exhausted);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let result = retry_with_check(fast(0), |n| async move { Ok::<_, &str>(n) }, |_| true).await;
        assert_eq!(result.unwrap(), 1);
    }
}
