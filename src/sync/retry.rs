//! The one retry/backoff primitive.
//!
//! Both the persistence client's save path and the coordinator's
//! verification step run through this helper, so attempt caps and
//! backoff shape live in a single place.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded-attempt retry with linear backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay after attempt N is `base_delay * N`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Run `op` until it succeeds, a non-retryable error occurs, or the
/// attempt cap is reached. The closure receives the 1-based attempt
/// number. The final error is returned as-is; nothing is swallowed.
pub async fn run_with_retry<T, E, F, Fut, R>(
    policy: RetryPolicy,
    label: &str,
    is_retryable: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: Display,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !is_retryable(&error) {
                    tracing::warn!(label, attempt, %error, "non-retryable failure");
                    return Err(error);
                }
                if attempt >= policy.max_attempts {
                    tracing::warn!(label, attempt, %error, "attempt cap reached");
                    return Err(error);
                }
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> =
            run_with_retry(fast_policy(3), "test", |_| true, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stops_at_attempt_cap() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> =
            run_with_retry(fast_policy(3), "test", |_| true, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("always".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "always");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = run_with_retry(
            fast_policy(5),
            "test",
            |e: &String| e != "terminal",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("terminal".to_string()) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
