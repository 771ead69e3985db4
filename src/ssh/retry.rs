//! Bounded retry with a fixed delay
//!
//! Used by [`SshSession::reconnect`](super::session::SshSession::reconnect).
//! Lab hosts either fail fast or come back within seconds, so the delay is
//! linear and there is no jitter.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

/// Number of attempts used when reconnecting a session
pub const RECONNECT_ATTEMPTS: usize = 3;

/// Delay between reconnect attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Fixed-delay retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (0 behaves like 1)
    pub attempts: usize,

    /// Sleep between two consecutive attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: RECONNECT_ATTEMPTS,
            delay: RECONNECT_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: usize, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Run `operation` until it succeeds or the attempts are exhausted.
    ///
    /// The error of the last attempt is returned as is.
    pub async fn run<T, E, F, Fut>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_with_attempt(operation_name, |_| operation()).await
    }

    /// Like [`run`](Self::run), passing the zero-based attempt index to `operation`.
    pub async fn run_with_attempt<T, E, F, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation = %operation_name,
                            attempt = attempt + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        operation = %operation_name,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        error = %e,
                        "Operation failed"
                    );

                    attempt += 1;
                    if attempt >= attempts {
                        return Err(e);
                    }
                    sleep(self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick(attempts: usize) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let mut call_count = 0;

        let result: Result<i32, String> = quick(3)
            .run("test", || {
                call_count += 1;
                async { Ok(42) }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count, 1);
    }

    #[tokio::test]
    async fn test_success_after_retries() {
        let mut call_count = 0;

        let result: Result<i32, String> = quick(3)
            .run("test", || {
                call_count += 1;
                let n = call_count;
                async move {
                    if n < 3 {
                        Err("temporary error".to_string())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(call_count, 3);
    }

    #[tokio::test]
    async fn test_last_error_propagates() {
        let mut call_count = 0;

        let result: Result<i32, String> = quick(3)
            .run("test", || {
                call_count += 1;
                let n = call_count;
                async move { Err(format!("failure {}", n)) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "failure 3");
        assert_eq!(call_count, 3);
    }

    #[tokio::test]
    async fn test_attempt_index_is_zero_based() {
        let mut seen = Vec::new();

        let result: Result<(), String> = quick(4)
            .run_with_attempt("test", |attempt| {
                seen.push(attempt);
                async { Err("nope".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let mut call_count = 0;

        let result: Result<(), String> = quick(0)
            .run("test", || {
                call_count += 1;
                async { Err("error".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(call_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(3));
        let start = tokio::time::Instant::now();

        let result: Result<(), String> = policy
            .run("test", || async { Err("down".to_string()) })
            .await;

        assert!(result.is_err());
        // two sleeps, none after the last attempt
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }
}
