//! Retry logic with exponential backoff
//!
//! Registry queries and GitHub API calls go through [`RetryManager`]; the
//! publish command itself is never retried, a fresh CI run is.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Substrings that mark an error as transient
const RETRYABLE_PATTERNS: &[&str] = &[
    "ECONNREFUSED",
    "ENOTFOUND",
    "ETIMEDOUT",
    "ECONNRESET",
    "EAI_AGAIN",
    "socket hang up",
    "network error",
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "503 Service Unavailable",
    "502 Bad Gateway",
];

/// Options for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Upper bound of the random delay added to every wait
    pub jitter: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryOptions {
    /// Retry without waiting, for tests and local dry runs
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: Duration::ZERO,
        }
    }
}

/// Retry manager for executing operations with exponential backoff
///
/// # Examples
///
/// ```no_run
/// use release_publisher::core::{RetryManager, RetryOptions};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let manager = RetryManager::new(RetryOptions::default());
///
///     let result = manager.retry(|| async {
///         Ok::<_, anyhow::Error>("success")
///     }).await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RetryManager {
    options: RetryOptions,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new(RetryOptions::default())
    }
}

impl RetryManager {
    /// Create a new RetryManager with the given options
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Execute the given async operation, retrying transient errors
    ///
    /// An error is transient when its message matches one of the known
    /// network failure patterns.
    pub async fn retry<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.retry_if(operation, |error: &E| Self::is_retryable_message(&error.to_string()))
            .await
    }

    /// Execute the given async operation, retrying errors accepted by `retryable`
    pub async fn retry_if<F, Fut, T, E, P>(&self, mut operation: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut delay = self.options.initial_delay;
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => {
                    if attempt >= self.options.max_attempts.max(1) || !retryable(&error) {
                        return Err(error);
                    }

                    tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying");
                    sleep(delay + self.jitter()).await;

                    delay = Duration::from_secs_f64(
                        delay.as_secs_f64() * self.options.backoff_multiplier,
                    )
                    .min(self.options.max_delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Check if an error message describes a transient failure
    pub fn is_retryable_message(message: &str) -> bool {
        let message = message.to_lowercase();
        RETRYABLE_PATTERNS
            .iter()
            .any(|pattern| message.contains(&pattern.to_lowercase()))
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.options.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        // v4 UUIDs carry 122 random bits, plenty for a jitter sample
        let sample = uuid::Uuid::new_v4().as_u128() as u64;
        Duration::from_millis(sample % (max_ms + 1))
    }
}
