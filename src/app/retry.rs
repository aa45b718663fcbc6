//! Retry with exponential backoff
//!
//! An opt-in wrapper callers apply around facade calls. Only transient
//! failure classes are retried: connectivity failures, timeouts, server
//! errors and rate limiting. Client errors surface immediately. The facade's
//! own recovery paths (refresh-and-retry, host failover) stay bounded to one
//! attempt each and are independent of this wrapper.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::constants::limits;
use crate::errors::{ApiError, ApiResult};

/// Backoff schedule for [`retry_with_backoff`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts made after the initial call
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling applied to every delay
    pub max_delay: Duration,
    /// Multiplier applied between attempts
    pub backoff_factor: f64,
    /// Randomize each delay to 50-100% of its nominal value
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: limits::MAX_RETRIES,
            initial_delay: Duration::from_millis(limits::RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(limits::MAX_BACKOFF_DELAY_MS),
            backoff_factor: limits::BACKOFF_FACTOR,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Aggressive schedule for critical operations
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.5,
            jitter: true,
        }
    }

    /// Conservative schedule for non-critical operations
    pub fn conservative() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5),
            backoff_factor: 1.5,
            jitter: true,
        }
    }

    /// Nominal delay for the attempt that just failed (0-based), capped at
    /// `max_delay`
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt as i32);
        let nominal = self.initial_delay.mul_f64(factor);
        let capped = nominal.min(self.max_delay);
        if self.jitter {
            capped.mul_f64(0.5 + fastrand::f64() * 0.5)
        } else {
            capped
        }
    }
}

/// Run `operation`, retrying transient failures per `policy`.
///
/// The last error is surfaced once retries are exhausted or a non-retryable
/// failure is observed.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> ApiResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ApiResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("Succeeded on attempt {}/{}", attempt + 1, policy.max_retries + 1);
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                attempt += 1;
                warn!(
                    "Attempt {}/{} failed ({e}). Retrying in {}ms",
                    attempt,
                    policy.max_retries + 1,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("Giving up after {} retries: {e}", policy.max_retries);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn network_error() -> ApiError {
        ApiError::Network {
            endpoint: "/x".into(),
            detail: "connection refused".into(),
        }
    }

    fn validation_error() -> ApiError {
        ApiError::Http {
            status: 422,
            endpoint: "/x".into(),
            message: "HTTP 422".into(),
            payload: None,
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            backoff_factor: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(&fast_policy(3), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(network_error())
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ApiResult<()> = retry_with_backoff(&fast_policy(3), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(validation_error())
        })
        .await;

        assert!(matches!(result, Err(ApiError::Http { status: 422, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_surfaces_last_error() {
        let calls = AtomicU32::new(0);
        let result: ApiResult<()> = retry_with_backoff(&fast_policy(2), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(network_error())
        })
        .await;

        assert!(matches!(result, Err(ApiError::Network { .. })));
        // initial call plus two retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
            backoff_factor: 2.0,
            jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(3000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(3000));
    }

    #[test]
    fn jitter_stays_within_half_to_full_range() {
        let policy = RetryPolicy {
            jitter: true,
            initial_delay: Duration::from_millis(1000),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(1000),
            max_retries: 1,
        };
        for _ in 0..50 {
            let d = policy.delay_for_attempt(0);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1000));
        }
    }
}
