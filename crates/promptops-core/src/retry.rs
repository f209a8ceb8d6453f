use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded retry with linear backoff.
///
/// Attempt `n` (1-based) that fails is followed by a sleep of
/// `base_delay * n`, unless it was the last allowed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

/// All attempts failed. Carries the error of the final attempt.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
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

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Sleep after the given failed attempt, or `None` if no attempt follows.
    pub fn backoff(&self, failed_attempt: u32) -> Option<Duration> {
        if failed_attempt >= self.max_attempts {
            return None;
        }
        Some(self.base_delay * failed_attempt)
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `op` receives the 1-based attempt number. On success the value is
    /// returned with the number of attempts it took.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<(T, u32), Exhausted<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(err) => match self.backoff(attempt) {
                    Some(delay) => {
                        tracing::warn!(
                            attempt,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        tracing::warn!(
                            attempt,
                            max_attempts = self.max_attempts,
                            error = %err,
                            "attempt failed, giving up"
                        );
                        return Err(Exhausted {
                            attempts: attempt,
                            last_error: err,
                        });
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_linear_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Some(Duration::from_millis(1000)));
        assert_eq!(policy.backoff(2), Some(Duration::from_millis(2000)));
        assert_eq!(policy.backoff(3), None);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::new(0, Duration::from_millis(10));
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.backoff(1), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = RetryPolicy::default()
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(format!("boom {attempt}"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        let (value, attempts) = result.unwrap();
        assert_eq!(value, "done");
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_keeps_last_error_and_skips_final_sleep() {
        let started = tokio::time::Instant::now();

        let result: Result<((), u32), _> = RetryPolicy::default()
            .run(|attempt| async move { Err(format!("boom {attempt}")) })
            .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, 3);
        assert_eq!(exhausted.last_error, "boom 3");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(4000));
    }
}
