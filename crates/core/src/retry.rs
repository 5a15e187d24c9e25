//! Retry and bounded polling
//!
//! Two shapes of waiting are used by the backends:
//!
//! * [`retry_async`] re-runs a fallible operation with exponential backoff and
//!   jitter, used for fixture downloads.
//! * [`poll_until`] re-checks a condition at a fixed interval until a hard
//!   wall-clock deadline, used for readiness probes and in-container health
//!   checks. It is cancelled only by deadline expiry.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (excluding initial attempt)
    pub max_attempts: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// A config that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before the retry following `attempt` (0-based), with equal jitter
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .as_millis()
            .saturating_mul(2_u128.saturating_pow(attempt));
        let capped = exponential.min(self.max_delay.as_millis()) as u64;
        let half = capped / 2;
        Duration::from_millis(half + fastrand::u64(0..=half))
    }
}

/// Error classification result for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the operation
    Retry,
    /// Do not retry (terminal error)
    Stop,
}

/// Retry an async operation with exponential backoff and jitter
pub async fn retry_async<T, E, Fut, Op>(
    config: &RetryConfig,
    operation: Op,
    classify_error: fn(&E) -> RetryDecision,
) -> std::result::Result<T, E>
where
    Op: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Debug,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("Operation succeeded on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(error) => {
                if classify_error(&error) == RetryDecision::Stop {
                    debug!("Error classifier indicated stop: {:?}", error);
                    return Err(error);
                }
                if attempt >= config.max_attempts {
                    warn!(
                        "All {} attempts exhausted, final error: {:?}",
                        attempt + 1,
                        error
                    );
                    return Err(error);
                }
                let delay = config.calculate_delay(attempt);
                debug!(
                    "Attempt {} failed ({:?}); retrying in {:?}",
                    attempt, error, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Poll `check` every `interval` until it returns true or `deadline` passes.
///
/// `check` receives the time remaining so it can bound its own work. Sleeps
/// are clipped to the deadline, so the call returns no later than the
/// deadline plus the duration of one in-flight check.
pub async fn poll_until<F, Fut>(deadline: Instant, interval: Duration, mut check: F) -> bool
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        if check(deadline - now).await {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
