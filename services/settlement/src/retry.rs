//! Bounded exponential backoff

use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1_000),
            max_backoff: Duration::from_millis(30_000),
        }
    }
}

/// Final result plus how many times the operation ran
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::from_millis(initial_backoff_ms),
            max_backoff: Duration::from_millis(max_backoff_ms.max(initial_backoff_ms)),
        }
    }

    /// Delay after the `attempt`-th failure (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        mut op: F,
        is_transient: impl Fn(&E) -> bool,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) if is_transient(&e) && attempt < self.max_attempts => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        "{} failed, retry {} of {} with {}ms backoff: {}",
                        label,
                        attempt,
                        self.max_attempts - 1,
                        backoff.as_millis(),
                        e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return RetryOutcome {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = RetryPolicy::new(10, 1_000, 5_000);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(4_000));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(5_000));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let outcome = RetryPolicy::default()
            .run(
                "flaky",
                move |_| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("busy".to_string())
                    } else {
                        Ok(7)
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(outcome.result, Ok(7));
        assert_eq!(outcome.attempts, 3);
        // 1s + 2s of virtual time
        assert!(started.elapsed() >= Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_errors_stop_immediately() {
        let outcome: RetryOutcome<(), String> = RetryPolicy::default()
            .run("rejected", |_| async { Err("no".to_string()) }, |_| false)
            .await;
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded() {
        let outcome: RetryOutcome<(), String> = RetryPolicy::new(3, 10, 10)
            .run("down", |_| async { Err("down".to_string()) }, |_| true)
            .await;
        assert_eq!(outcome.attempts, 3);
    }
}
