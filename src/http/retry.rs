//! Retry logic for n8n API calls with exponential backoff and jitter.

use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Retries performed after the first attempt unless configured otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Delay before the first retry in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Upper bound for a single backoff delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Relative jitter applied to every backoff delay (±20%).
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;

/// HTTP statuses that are worth another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryableStatuses(Vec<RangeInclusive<u16>>);

impl RetryableStatuses {
    pub fn new(ranges: Vec<RangeInclusive<u16>>) -> Self {
        Self(ranges)
    }

    pub fn contains(&self, status: u16) -> bool {
        self.0.iter().any(|range| range.contains(&status))
    }
}

impl Default for RetryableStatuses {
    /// 429 Too Many Requests and every 5xx.
    fn default() -> Self {
        Self(vec![429..=429, 500..=599])
    }
}

/// Computes the backoff before retry number `attempt` (1-based).
///
/// `base_delay * 2^(attempt - 1)`, capped at `max_delay`, then scaled by
/// `1 + jitter_ratio * jitter_sample`. `jitter_sample` is expected in
/// `[-1.0, 1.0]` and is clamped to that range; `jitter_ratio` is clamped to
/// `[0.0, 1.0]`.
pub fn backoff_delay(
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
    jitter_sample: f64,
) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let capped = base_delay.saturating_mul(1u32 << exponent).min(max_delay);

    let ratio = jitter_ratio.clamp(0.0, 1.0);
    let offset = ratio * jitter_sample.clamp(-1.0, 1.0);
    if offset == 0.0 {
        return capped;
    }
    capped.mul_f64(1.0 + offset)
}

/// Decides whether and when a failed attempt is repeated.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
    retryable: RetryableStatuses,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        )
    }
}

impl RetryPolicy {
    /// `max_retries` counts the attempts made after the first one.
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_retries.saturating_add(1),
            base_delay,
            max_delay,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            retryable: RetryableStatuses::default(),
        }
    }

    pub fn with_jitter(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_retryable_statuses(mut self, retryable: RetryableStatuses) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    /// Jittered delay before retry number `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let sample = if self.jitter_ratio > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        backoff_delay(
            attempt,
            self.base_delay,
            self.max_delay,
            self.jitter_ratio,
            sample,
        )
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// runs out of attempts, or `cancel` fires.
    ///
    /// Exhaustion wraps the last error in [`Error::RetryExhausted`].
    pub async fn execute<T, F, Fut>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = operation() => outcome,
            };

            let error = match outcome {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_retryable_with(&self.retryable) {
                debug!("{}: non-retryable error: {}", operation_name, error);
                return Err(error);
            }

            if attempt >= self.max_attempts {
                warn!(
                    "{}: giving up after {} attempts ({})",
                    operation_name, attempt, error
                );
                return Err(Error::RetryExhausted {
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                operation_name,
                attempt,
                self.max_attempts,
                error,
                delay.as_millis()
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn api_error(status: u16) -> Error {
        Error::Api {
            status,
            message: format!("HTTP {}", status),
            body: None,
        }
    }

    #[test]
    fn test_backoff_delay_grows_exponentially() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(60);

        assert_eq!(backoff_delay(1, base, max, 0.0, 0.0), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, base, max, 0.0, 0.0), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, base, max, 0.0, 0.0), Duration::from_millis(400));
        assert_eq!(backoff_delay(5, base, max, 0.0, 0.0), Duration::from_millis(1600));
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(250);

        assert_eq!(backoff_delay(3, base, max, 0.0, 0.0), max);
        assert_eq!(backoff_delay(u32::MAX, base, max, 0.0, 0.0), max);
    }

    fn assert_close(actual: Duration, expected_ms: u64) {
        let actual_ms = actual.as_secs_f64() * 1000.0;
        assert!(
            (actual_ms - expected_ms as f64).abs() < 1.0,
            "expected ~{}ms, got {:?}",
            expected_ms,
            actual
        );
    }

    #[test]
    fn test_backoff_delay_jitter_bounds() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_secs(60);

        assert_close(backoff_delay(1, base, max, 0.2, 1.0), 1200);
        assert_close(backoff_delay(1, base, max, 0.2, -1.0), 800);
        // out-of-range samples are clamped
        assert_close(backoff_delay(1, base, max, 0.2, 5.0), 1200);
        assert_close(backoff_delay(2, base, max, 0.2, -1.0), 1600);
    }

    #[test]
    fn test_delay_for_stays_within_jitter_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_secs(10));
        for _ in 0..100 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_millis(159), "{:?}", delay);
            assert!(delay <= Duration::from_millis(241), "{:?}", delay);
        }
    }

    #[test]
    fn test_retryable_statuses_default() {
        let statuses = RetryableStatuses::default();
        assert!(statuses.contains(429));
        assert!(statuses.contains(500));
        assert!(statuses.contains(599));
        assert!(!statuses.contains(404));
        assert!(!statuses.contains(200));
    }

    #[test]
    fn test_max_attempts_counts_first_attempt() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 4);

        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_succeeds_after_two_retryable_failures() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100), Duration::from_secs(10));
        let attempts = Arc::new(AtomicU32::new(0));
        let started = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();

        let result = policy
            .execute("test", &cancel, || {
                let attempts = Arc::clone(&attempts);
                let started = Arc::clone(&started);
                async move {
                    started.lock().push(Instant::now());
                    let count = attempts.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        Err(api_error(503))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        let started = started.lock();
        let first_delay = started[1] - started[0];
        let second_delay = started[2] - started[1];
        assert!(first_delay >= Duration::from_millis(79));
        assert!(first_delay <= Duration::from_millis(121));
        assert!(second_delay >= first_delay);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_not_found_is_not_retried() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result: Result<()> = policy
            .execute("test", &cancel, || {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(Error::NotFound {
                        resource: "workflow 1".to_string(),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_client_error_is_not_retried() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result: Result<()> = policy
            .execute("test", &cancel, || {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(api_error(401))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Api { status: 401, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_exhausts_retries() {
        let policy = RetryPolicy::new(2, Duration::from_millis(10), Duration::from_secs(1));
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let result: Result<()> = policy
            .execute("test", &cancel, || {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(Error::Network {
                        message: "connection reset".to_string(),
                        timed_out: false,
                    })
                }
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        match result {
            Err(Error::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, Error::Network { .. }));
            }
            other => panic!("expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_cancelled_before_first_attempt() {
        let policy = RetryPolicy::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<()> = policy
            .execute("test", &cancel, || {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_cancelled_during_backoff_skips_remaining_retries() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(10));
        let attempts = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let result: Result<()> = policy
            .execute("test", &cancel, || {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(api_error(500))
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_cancel_aborts_running_attempt() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result: Result<()> = policy
            .execute("test", &cancel, || async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
