//! Bounded retries with exponential backoff for artifact requests.
//!
//! Whether a failure is worth another attempt is decided by [`IsRetryable`];
//! [`download_with_retry`] sleeps between attempts, doubling the delay (by
//! default) up to `max_delay`, with optional jitter so a pool of workers hit
//! by the same outage does not retry in lockstep.
//!
//! ```no_run
//! use caa_mirror::FetchError;
//! use caa_mirror::config::RetryConfig;
//! use caa_mirror::retry::download_with_retry;
//!
//! # async fn example(client: reqwest::Client, url: String) -> Result<(), FetchError> {
//! let body = download_with_retry(&RetryConfig::default(), || {
//!     let (client, url) = (client.clone(), url.clone());
//!     async move {
//!         let response = client.get(&url).send().await.map_err(|e| FetchError::Request {
//!             url: url.clone(),
//!             source: e,
//!         })?;
//!         if !response.status().is_success() {
//!             return Err(FetchError::Status {
//!                 status: response.status().as_u16(),
//!                 url,
//!             });
//!         }
//!         response
//!             .bytes()
//!             .await
//!             .map_err(|e| FetchError::Request { url, source: e })
//!     }
//! })
//! .await?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::FetchError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, server errors, connection reset) should return `true`.
/// Permanent failures (missing artifact, disk full, bad metadata) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            // Upstream has no such artifact; asking again will not change that
            FetchError::NotFound { .. } => false,
            // 5xx, 429, 403 and friends may clear up
            FetchError::Status { .. } => true,
            // Timeouts, refused or reset connections, truncated bodies
            FetchError::Request { .. } => true,
            FetchError::EmptyBody { .. } => true,
            // Disk errors are reported per record and counted by the coordinator
            FetchError::Write { .. } => false,
            FetchError::InvalidRecord { .. } => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// `config.max_attempts` is the total number of calls, so the operation runs
/// at most `max_attempts` times and sleeps at most `max_attempts - 1` times.
///
/// # Returns
///
/// Returns the successful result or the last error after all attempts are exhausted.
/// Non-retryable errors are returned immediately.
pub async fn download_with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::debug!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                attempt += 1;
                delay = next_delay(delay, config);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::debug!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Delay before the attempt after one that waited `delay`, capped at `max_delay`
///
/// Products too large for a `Duration` (or NaN) saturate to `max_delay`.
fn next_delay(delay: Duration, config: &RetryConfig) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`,
/// saturating at `Duration::MAX`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
        .unwrap_or(Duration::MAX)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let config = RetryConfig::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = download_with_retry(&config, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let config = fast_config(3);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = download_with_retry(&config, || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "should fail twice before success"
        );
    }

    #[tokio::test]
    async fn test_attempt_ceiling_is_total_calls() {
        let config = fast_config(3);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = download_with_retry(&config, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_calls_once() {
        let config = fast_config(0);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let _ = download_with_retry(&config, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_no_retry() {
        let config = RetryConfig::default();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = download_with_retry(&config, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "should not retry permanent error"
        );
    }

    #[tokio::test]
    async fn test_exponential_backoff() {
        let config = fast_config(4);

        let start = std::time::Instant::now();
        let _result = download_with_retry(&config, || async {
            Err::<i32, _>(TestError::Transient)
        })
        .await;
        let elapsed = start.elapsed();

        // Sleeps between the four attempts: 10ms + 20ms + 40ms = 70ms
        // Upper bound is generous to tolerate CI and coverage instrumentation overhead
        assert!(
            elapsed >= Duration::from_millis(70),
            "should wait at least 70ms, waited {:?}",
            elapsed
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "should not wait too long, waited {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn test_max_delay_caps_backoff() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(25),
            backoff_multiplier: 10.0,
            jitter: false,
        };

        let start = std::time::Instant::now();
        let _ = download_with_retry(&config, || async { Err::<i32, _>(TestError::Transient) }).await;
        let elapsed = start.elapsed();

        // 20ms + 25ms + 25ms instead of 20ms + 200ms + 2000ms
        assert!(elapsed >= Duration::from_millis(70));
        assert!(elapsed < Duration::from_millis(1000), "waited {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_oversized_multiplier_saturates_at_max_delay() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(30),
            backoff_multiplier: 1e300,
            jitter: false,
        };
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let start = std::time::Instant::now();
        let result = download_with_retry(&config, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;
        let elapsed = start.elapsed();

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        // 10ms, then capped at 30ms
        assert!(elapsed >= Duration::from_millis(40), "waited {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "waited {:?}", elapsed);
    }

    #[test]
    fn test_next_delay_handles_non_finite_products() {
        let mut config = fast_config(3);
        config.max_delay = Duration::from_secs(5);

        config.backoff_multiplier = f64::INFINITY;
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(5));

        config.backoff_multiplier = f64::NAN;
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(5));

        config.backoff_multiplier = 2.0;
        assert_eq!(next_delay(Duration::from_secs(1), &config), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_saturates_on_huge_delay() {
        assert_eq!(add_jitter(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..100 {
            let jittered = add_jitter(base);
            assert!(jittered >= base);
            assert!(jittered <= base * 2);
        }
    }

    #[test]
    fn test_fetch_error_retry_classification() {
        let url = "http://example.com/a.jpg".to_string();
        assert!(!FetchError::NotFound { url: url.clone() }.is_retryable());
        assert!(
            FetchError::Status {
                status: 500,
                url: url.clone()
            }
            .is_retryable()
        );
        assert!(
            FetchError::Status {
                status: 403,
                url: url.clone()
            }
            .is_retryable()
        );
        assert!(FetchError::EmptyBody { url }.is_retryable());
        assert!(
            !FetchError::Write {
                path: PathBuf::from("/cache/x.jpg"),
                source: std::io::Error::other("read-only file system"),
            }
            .is_retryable()
        );
    }
}
