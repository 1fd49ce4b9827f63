//! Retry logic with exponential backoff.
//!
//! Retries always happen at the caller: a session never retries a failed
//! connection by itself. The CLI retries whole sessions after transient
//! connection failures, and the connectivity prober retries rate-limited or
//! unavailable API calls and paces its operation polling.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles delay each retry).
    pub backoff_multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Whole-session retries after a transient connection failure.
    pub fn for_connection(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a config optimized for API rate limits.
    pub fn for_rate_limits() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Fixed-interval cadence for polling a long-running operation.
    /// `max_polls` counts every poll, including the first.
    pub fn for_operation_polling(interval: Duration, max_polls: u32) -> Self {
        Self {
            max_retries: max_polls.saturating_sub(1),
            initial_delay: interval,
            max_delay: interval,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Creates a config with no retries (for testing or when retries are unwanted).
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Calculates the delay for a given attempt number.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1) as i32);

        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.add_jitter {
            // Add up to 25% jitter
            let jitter = capped_delay * 0.25 * rand_jitter();
            capped_delay + jitter
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// Simple pseudo-random jitter (0.0 to 1.0) without external dependencies.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

/// Determines if an error is worth retrying.
///
/// Authentication, configuration and collection errors never are: retrying
/// them only repeats the same failure.
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::RateLimit(_) | Error::Io(_) | Error::Connection(_) => true,
        Error::Http(e) => e.is_timeout() || e.is_connect(),
        Error::Prober(message) => {
            let message = message.to_lowercase();
            ["429", "500", "502", "503", "504", "unavailable", "timeout"]
                .iter()
                .any(|pattern| message.contains(pattern))
        }
        _ => false,
    }
}

/// Executes an async operation with retry logic.
///
/// # Arguments
///
/// * `config` - Retry configuration
/// * `operation_name` - Name for logging purposes
/// * `operation` - The async operation to execute
///
/// # Returns
///
/// The result of the operation, or the last error if all retries failed.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.delay_for_attempt(attempt);
            debug!(
                "{}: Retry attempt {}/{} after {:?}",
                operation_name, attempt, config.max_retries, delay
            );
            sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{}: Succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if is_retryable_error(&e) && attempt < config.max_retries => {
                warn!(
                    "{}: Retryable error (attempt {}/{}): {}",
                    operation_name,
                    attempt + 1,
                    max_attempts,
                    e
                );
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
