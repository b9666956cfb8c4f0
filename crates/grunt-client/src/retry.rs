//! Retry budget with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for coordinator requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts per request (at least one is always made)
    pub max_retries: u32,
    /// Delay after the first failed attempt; doubled after each further failure
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A single attempt, no backoff.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Delay before retrying after failed attempt `attempt` (0-indexed).
    ///
    /// Formula: base_delay * 2^attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 2^20 * base is already far beyond any sane budget
        let multiplier = 2u32.pow(attempt.min(20));
        self.base_delay.saturating_mul(multiplier)
    }

    /// Whether another attempt follows failed attempt `attempt` (0-indexed).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.attempts()
    }

    /// Run `op` until it succeeds or the attempt budget is spent, sleeping
    /// [`delay_for`](Self::delay_for) between attempts. Returns the last error.
    pub async fn run<T, E, F, Fut>(&self, endpoint: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(attempt) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        endpoint,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Coordinator request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..5).map(|a| policy.delay_for(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
    }

    #[test]
    fn test_should_retry_stops_at_budget() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }

    #[test]
    fn test_zero_budget_still_attempts_once() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(policy.attempts(), 1);
        assert!(!policy.should_retry(0));
    }

    #[test]
    fn test_delay_does_not_overflow() {
        let policy = RetryPolicy::new(100, Duration::from_secs(u64::MAX / 2));
        assert_eq!(policy.delay_for(64), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sleeps_exponentially_between_attempts() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let attempts = Mutex::new(Vec::new());

        let result: Result<(), String> = policy
            .run("/queue/tasks/heartbeat", || {
                attempts.lock().push(Instant::now());
                async { Err("API error 500: busy".to_string()) }
            })
            .await;
        let returned = Instant::now();

        assert_eq!(result.unwrap_err(), "API error 500: busy");
        let attempts = attempts.into_inner();
        assert_eq!(attempts.len(), 5);

        for (i, pair) in attempts.windows(2).enumerate() {
            let gap = pair[1] - pair[0];
            let expected = Duration::from_secs(1 << i);
            assert!(
                gap >= expected && gap < expected + Duration::from_millis(10),
                "gap {} was {:?}",
                i,
                gap
            );
        }
        // No sleep after the final attempt.
        assert!(returned - attempts[4] < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_first_success() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1));
        let started = Instant::now();
        let calls = Mutex::new(0u32);

        let result = policy
            .run("/queue/tasks/mark_complete", || {
                let call = {
                    let mut calls = calls.lock();
                    *calls += 1;
                    *calls
                };
                async move {
                    if call < 3 {
                        Err(format!("attempt {} failed", call))
                    } else {
                        Ok(call)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
    }
}
