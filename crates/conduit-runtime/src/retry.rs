//! Retry with exponential backoff and a per-attempt timeout.
//!
//! Only retryable error kinds are re-sent. Jitter is seeded from the clock.

use conduit_types::config::RetrySettings;
use conduit_types::ConduitError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry budget and timing for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts including the first try. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub min_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// The actual sleep is `delay * (1 + random_fraction * jitter)`.
    pub jitter: f64,
    /// Bound on each individual attempt.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default(), 0)
    }
}

impl RetryConfig {
    /// `retries` is the number of retries after the first attempt.
    pub fn from_settings(settings: &RetrySettings, retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            min_delay_ms: settings.min_delay_ms,
            max_delay_ms: settings.max_delay_ms,
            jitter: settings.jitter,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

/// Result of a retry loop.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Success {
        result: T,
        /// 1 = first try succeeded.
        attempts: u32,
    },
    Exhausted {
        last_error: ConduitError,
        attempts: u32,
    },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Success { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn into_result(self) -> Result<T, ConduitError> {
        match self {
            RetryOutcome::Success { result, .. } => Ok(result),
            RetryOutcome::Exhausted { last_error, .. } => Err(last_error),
        }
    }
}

/// Delay before retry number `attempt + 1` (0-indexed).
///
/// Formula: `min(min_delay * 2^attempt, max_delay) * (1 + random * jitter)`,
/// clamped to `max_delay`.
pub fn compute_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config
        .min_delay_ms
        .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped = base.min(config.max_delay_ms);

    if config.jitter <= 0.0 {
        return capped;
    }

    let frac = pseudo_random_fraction();
    let with_jitter = (capped as f64) * (1.0 + frac * config.jitter);
    (with_jitter as u64).min(config.max_delay_ms)
}

/// A fraction in `[0, 1)` from the current time. Not cryptographically secure.
fn pseudo_random_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    // Knuth multiplicative hash
    let mixed = nanos.wrapping_mul(2654435761);
    (mixed as f64) / (u32::MAX as f64 + 1.0)
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget runs out.
///
/// An attempt that exceeds `attempt_timeout` is dropped and counts as a
/// `Timeout` failure. Only kinds reported by `ConduitError::is_retryable`
/// are retried.
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, mut operation: F) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ConduitError>>,
{
    let max = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let result = match config.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation(attempt)).await {
                Ok(r) => r,
                Err(_) => Err(ConduitError::Timeout(format!(
                    "attempt {} exceeded {}ms",
                    attempt + 1,
                    limit.as_millis()
                ))),
            },
            None => operation(attempt).await,
        };

        match result {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt + 1, "Retry succeeded");
                }
                return RetryOutcome::Success {
                    result,
                    attempts: attempt + 1,
                };
            }
            Err(err) => {
                if !err.is_retryable() {
                    debug!(attempt = attempt + 1, kind = %err.kind(), "Error is not retryable: {err}");
                    return RetryOutcome::Exhausted {
                        last_error: err,
                        attempts: attempt + 1,
                    };
                }
                if attempt + 1 >= max {
                    if max > 1 {
                        warn!(attempts = max, kind = %err.kind(), "All retry attempts exhausted: {err}");
                    }
                    return RetryOutcome::Exhausted {
                        last_error: err,
                        attempts: attempt + 1,
                    };
                }

                let delay_ms = compute_backoff(config, attempt);
                debug!(attempt = attempt + 1, delay_ms, kind = %err.kind(), "Retrying after error");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(retries: u32) -> RetryConfig {
        RetryConfig {
            max_attempts: retries + 1,
            min_delay_ms: 1,
            max_delay_ms: 10,
            jitter: 0.0,
            attempt_timeout: None,
        }
    }

    #[test]
    fn test_from_settings() {
        let config = RetryConfig::from_settings(&RetrySettings::default(), 2);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.min_delay_ms, 200);
        assert_eq!(config.max_delay_ms, 10_000);
        assert_eq!(RetryConfig::default().max_attempts, 1);
    }

    #[test]
    fn test_compute_backoff_doubles_and_caps() {
        let config = RetryConfig {
            max_attempts: 10,
            min_delay_ms: 1_000,
            max_delay_ms: 5_000,
            jitter: 0.0,
            attempt_timeout: None,
        };
        assert_eq!(compute_backoff(&config, 0), 1_000);
        assert_eq!(compute_backoff(&config, 1), 2_000);
        assert_eq!(compute_backoff(&config, 2), 4_000);
        assert_eq!(compute_backoff(&config, 3), 5_000);
        assert_eq!(compute_backoff(&config, 64), 5_000);
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let config = RetryConfig {
            max_attempts: 3,
            min_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter: 0.5,
            attempt_timeout: None,
        };
        for _ in 0..50 {
            let d = compute_backoff(&config, 0);
            assert!((100..=150).contains(&d), "{d}");
        }
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let outcome = retry_async(&fast(3), move |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ConduitError::Connection("refused".into()))
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(outcome.attempts(), 3);
        assert_eq!(outcome.into_result().unwrap(), "done");
    }

    #[tokio::test]
    async fn test_exhausts_retry_count() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let outcome: RetryOutcome<()> = retry_async(&fast(2), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(ConduitError::External("502".into())) }
        })
        .await;
        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 3, .. }));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validation_is_never_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();
        let outcome: RetryOutcome<()> = retry_async(&fast(5), move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(ConduitError::Validation("bad".into())) }
        })
        .await;
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retryable_timeout() {
        let config = fast(1).with_attempt_timeout(Duration::from_millis(20));
        let outcome = retry_async(&config, |attempt| async move {
            if attempt == 0 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok::<u32, ConduitError>(attempt)
        })
        .await;
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(outcome.into_result().unwrap(), 1);
    }
}
