//! Bounded retry with exponential backoff and a per-attempt timeout.
//!
//! Only [`TorError::is_retryable`] failures are retried. A timed-out attempt
//! counts as transient.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::TorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(1000),
            attempt_timeout: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// No retries, same timeout.
    pub fn once(attempt_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            attempt_timeout,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub async fn run<T, F, Fut>(&self, op: &str, mut f: F) -> Result<T, TorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TorError>>,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.attempt_timeout, f()).await {
                Ok(r) => r,
                Err(_) => Err(TorError::Transient(format!(
                    "{op} timed out after {}ms",
                    self.attempt_timeout.as_millis()
                ))),
            };
            match result {
                Err(e) if e.is_retryable() && attempt < max => {
                    let delay = self.backoff(attempt);
                    warn!(op, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(25),
            attempt_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(10));
        assert_eq!(p.backoff(2), Duration::from_millis(20));
        assert_eq!(p.backoff(3), Duration::from_millis(25));
        assert_eq!(p.backoff(40), Duration::from_millis(25));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out = policy()
            .run("load", move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TorError::Transient("deadlock".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = policy()
            .run("load", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TorError::Transient("pool timeout".into()))
                }
            })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_conflict() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = policy()
            .run("commit", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TorError::ConcurrentModification)
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TorError::ConcurrentModification));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_as_transient() {
        let err = RetryPolicy::once(Duration::from_millis(50))
            .run("load", || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, TorError>(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 503);
        assert!(err.to_string().contains("timed out"));
    }
}
