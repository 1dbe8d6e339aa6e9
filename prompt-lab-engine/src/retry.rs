//! Bounded retry with exponential backoff.
//!
//! # Example
//!
//! ```no_run
//! use prompt_lab_engine::retry::{execute_with_retry, RetryOptions};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = RetryOptions::new(3, Duration::from_millis(100));
//! let value = execute_with_retry(|| async { Ok::<_, std::io::Error>(42) }, options).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Decides whether and how long to wait before another attempt.
pub trait RetryPolicy: Send + Sync {
    /// Delay before retry number `retry` (1-based), or `None` once retries are exhausted.
    fn next_delay(&self, retry: u32) -> Option<Duration>;

    /// Total number of attempts, the first one included.
    fn max_attempts(&self) -> u32;
}

/// `retry_count` extra attempts after the first, waiting `base_delay * 2^(n-1)` before the n-th.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    pub retry_count: u32,
    pub base_delay: Duration,
}

impl RetryOptions {
    pub fn new(retry_count: u32, base_delay: Duration) -> Self {
        Self {
            retry_count,
            base_delay,
        }
    }

    /// A single attempt, no retry.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    retry_count: u32,
    base_delay: Duration,
    max_delay: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn new(options: RetryOptions) -> Self {
        Self {
            retry_count: options.retry_count,
            base_delay: options.base_delay,
            max_delay: None,
        }
    }

    /// Caps every single delay at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.retry_count {
            return None;
        }

        let factor = 2u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);

        Some(match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        })
    }

    fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }
}

/// The last error of an exhausted retry, with the number of attempts made.
#[derive(Debug)]
pub struct RetryError<E> {
    pub error: E,
    pub attempts: u32,
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed after {} attempts: {}", self.attempts, self.error)
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Calls `f` until it succeeds or `policy` runs out of retries.
pub async fn retry<F, Fut, T, E, P>(policy: &P, mut f: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
    P: RetryPolicy + ?Sized,
{
    let mut attempt: u32 = 1;

    loop {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "call succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => match policy.next_delay(attempt) {
                Some(delay) => {
                    warn!(
                        attempt,
                        max_attempts = policy.max_attempts(),
                        ?delay,
                        %error,
                        "attempt failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    debug!(attempts = attempt, %error, "retries exhausted");
                    return Err(RetryError {
                        error,
                        attempts: attempt,
                    });
                }
            },
        }
    }
}

/// Exponential-backoff retry with the given options.
pub async fn execute_with_retry<F, Fut, T, E>(
    f: F,
    options: RetryOptions,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    retry(&ExponentialBackoff::new(options), f).await
}
