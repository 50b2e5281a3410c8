//! Retry utilities for resilient operations
//!
//! Attempt-bounded retry with optional exponential backoff. Used by the SMTP
//! connector (fixed pause, three attempts) and by the HTTP fetcher
//! (exponential backoff on retryable statuses).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Delay in milliseconds before the second attempt
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt (1.0 keeps the pause fixed)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with the default delays
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// The same pause between every attempt
    pub fn fixed(max_attempts: u32, pause: Duration) -> Self {
        let pause_ms = pause.as_millis() as u64;
        Self {
            max_attempts,
            base_delay_ms: pause_ms,
            max_delay_ms: pause_ms,
            backoff_multiplier: 1.0,
        }
    }

    /// Exponential backoff with custom delays
    pub fn with_delays(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier: 2.0,
        }
    }

    /// Delay before `attempt` (1-based); nothing before the first
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let delay_ms = if attempt <= 1 {
            0
        } else {
            let exponential =
                self.base_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 2) as i32);
            (exponential as u64).min(self.max_delay_ms)
        };

        Duration::from_millis(delay_ms)
    }
}

/// Execute an operation until it succeeds or the attempts run out.
///
/// Returns the last error when every attempt fails.
///
/// # Example
///
/// ```no_run
/// use tidings::utils::retry::{with_retry, RetryConfig};
/// use std::time::Duration;
///
/// # async fn connect() -> Result<(), String> { Ok(()) }
/// # async fn run() -> Result<(), String> {
/// let config = RetryConfig::fixed(3, Duration::from_secs(2));
/// with_retry(&config, || async { connect().await }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry<T, E, F, Fut>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    with_retry_if(config, operation, |_| true).await
}

/// Execute an operation with retries, but only while `should_retry` accepts
/// the error. A rejected error is returned immediately.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let delay = config.delay_before(attempt);
        if !delay.is_zero() {
            debug!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying operation after delay"
            );
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    error = %e,
                    "Operation failed"
                );

                if attempt >= max_attempts || !should_retry(&e) {
                    return Err(e);
                }
            }
        }

        attempt += 1;
    }
}
