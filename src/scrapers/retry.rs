//! Bounded retry with backoff for transient network failures.
//!
//! Provides a [`RetryPolicy`] with fixed or exponential backoff, optional
//! jitter, and `Retry-After` header support. Sleeping goes through the
//! [`Sleeper`] trait so tests can record delays instead of waiting.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum backoff delay (seconds), also the cap for `Retry-After`.
const MAX_BACKOFF_SECS: u64 = 60;

/// Parse Retry-After header value (seconds).
/// Returns duration to wait, or None if header is missing/invalid.
pub fn parse_retry_after(header_value: Option<&str>) -> Option<Duration> {
    let value = header_value?.trim();
    let secs = value.parse::<u64>().ok()?;
    Some(Duration::from_secs(secs.min(MAX_BACKOFF_SECS)))
}

/// How a failed attempt should be treated by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryHint {
    /// Permanent failure, give up immediately.
    No,
    /// Transient failure, retry after the policy's backoff.
    Yes,
    /// Transient failure with a server-provided wait.
    After(Duration),
}

/// Errors that know whether they are worth retrying.
pub trait Retryable {
    fn retry_hint(&self) -> RetryHint;
}

/// Something that can wait. Production code uses [`TokioSleeper`].
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Records requested sleeps without waiting.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// All durations requested so far, in order.
    pub fn recorded(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

/// Backoff curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryConfigError {
    #[error("max attempts must be at least 1")]
    ZeroAttempts,
    #[error("jitter must be within 0.0..=1.0, got {0}")]
    JitterOutOfRange(String),
}

/// Bounded retry policy: attempt count, backoff curve, jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff: Backoff,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(MAX_BACKOFF_SECS),
            backoff: Backoff::Exponential,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        backoff: Backoff,
        jitter: f64,
    ) -> Result<Self, RetryConfigError> {
        if max_attempts == 0 {
            return Err(RetryConfigError::ZeroAttempts);
        }
        if !(0.0..=1.0).contains(&jitter) {
            return Err(RetryConfigError::JitterOutOfRange(jitter.to_string()));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            max_delay: Duration::from_secs(MAX_BACKOFF_SECS),
            backoff,
            jitter,
        })
    }

    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Un-jittered delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.base_delay,
            Backoff::Exponential => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt.min(16))),
        };
        delay.min(self.max_delay)
    }

    /// Delay with jitter applied: scaled by a random factor in `[1 - jitter, 1 + jitter]`.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.delay_for(attempt);
        if self.jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 0-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, label: &str, sleeper: &dyn Sleeper, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let hint = err.retry_hint();
                    if hint == RetryHint::No {
                        return Err(err);
                    }
                    if attempt + 1 >= self.max_attempts {
                        warn!("{}: giving up after {} attempts: {}", label, attempt + 1, err);
                        return Err(err);
                    }

                    let wait = match hint {
                        RetryHint::After(d) => d.min(self.max_delay),
                        _ => self.jittered_delay(attempt, &mut rand::thread_rng()),
                    };
                    debug!(
                        "{}: attempt {} failed ({}), retrying in {:?}",
                        label,
                        attempt + 1,
                        err,
                        wait
                    );
                    sleeper.sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct FakeError(RetryHint);

    impl fmt::Display for FakeError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake {:?}", self.0)
        }
    }

    impl Retryable for FakeError {
        fn retry_hint(&self) -> RetryHint {
            self.0
        }
    }

    fn policy(attempts: u32, backoff: Backoff) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(100), backoff, 0.0).unwrap()
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after(Some("5")), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(Some("0")), Some(Duration::from_secs(0)));
        assert_eq!(parse_retry_after(Some("100")), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_parse_retry_after_invalid() {
        assert_eq!(parse_retry_after(None), None);
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
    }

    #[test]
    fn test_backoff_delay() {
        let p = policy(5, Backoff::Exponential);
        assert_eq!(p.delay_for(0), Duration::from_millis(100));
        assert_eq!(p.delay_for(1), Duration::from_millis(200));
        assert_eq!(p.delay_for(2), Duration::from_millis(400));
        assert_eq!(p.delay_for(20), Duration::from_secs(60));

        let p = policy(5, Backoff::Fixed);
        assert_eq!(p.delay_for(3), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let p = RetryPolicy::new(3, Duration::from_millis(1000), Backoff::Fixed, 0.5).unwrap();
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let d = p.jittered_delay(0, &mut rng);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert_eq!(
            RetryPolicy::new(0, Duration::ZERO, Backoff::Fixed, 0.0),
            Err(RetryConfigError::ZeroAttempts)
        );
        assert!(RetryPolicy::new(1, Duration::ZERO, Backoff::Fixed, 1.5).is_err());
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let sleeper = RecordingSleeper::new();
        let p = policy(3, Backoff::Exponential);

        let result: Result<u32, FakeError> = p
            .run("test", &sleeper, |attempt| async move {
                if attempt < 2 {
                    Err(FakeError(RetryHint::Yes))
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let sleeper = RecordingSleeper::new();
        let p = policy(5, Backoff::Fixed);
        let mut calls = 0;

        let result: Result<(), FakeError> = p
            .run("test", &sleeper, |_| {
                calls += 1;
                async { Err(FakeError(RetryHint::No)) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_attempts_are_bounded_and_honor_retry_after() {
        let sleeper = RecordingSleeper::new();
        let p = policy(3, Backoff::Fixed);
        let mut calls = 0;

        let result: Result<(), FakeError> = p
            .run("test", &sleeper, |_| {
                calls += 1;
                async { Err(FakeError(RetryHint::After(Duration::from_secs(7)))) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(7), Duration::from_secs(7)]
        );
    }
}
