//! Per-call deadline for provider requests.
//!
//! When the deadline wins the race the pending future is dropped. Whatever
//! the remote side eventually answers is discarded; nothing is cancelled
//! upstream.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TimeoutError<E> {
    /// The deadline fired before the operation settled.
    #[error("Operation timed out after {elapsed:?}")]
    Elapsed { elapsed: Duration },

    /// The operation settled with its own error in time.
    #[error("{0}")]
    Inner(E),
}

impl<E> TimeoutError<E> {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, TimeoutError::Elapsed { .. })
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            TimeoutError::Inner(e) => Some(e),
            TimeoutError::Elapsed { .. } => None,
        }
    }
}

/// Races `future` against a timer of `duration`.
pub async fn execute_with_timeout<F, T, E>(
    duration: Duration,
    future: F,
) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(duration, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimeoutError::Inner(e)),
        Err(_) => Err(TimeoutError::Elapsed { elapsed: duration }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let result = execute_with_timeout(Duration::from_millis(30), async {
            sleep(Duration::from_millis(100)).await;
            Ok::<_, String>("late value")
        })
        .await;

        assert_eq!(
            result,
            Err(TimeoutError::Elapsed {
                elapsed: Duration::from_millis(30)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_returns_value() {
        let result = execute_with_timeout(Duration::from_millis(100), async {
            sleep(Duration::from_millis(10)).await;
            Ok::<_, String>(42)
        })
        .await;

        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_inner_error_is_passed_through() {
        let result = execute_with_timeout(Duration::from_secs(1), async {
            Err::<(), _>("provider said no".to_string())
        })
        .await;

        let err = result.unwrap_err();
        assert!(!err.is_elapsed());
        assert_eq!(err.into_inner(), Some("provider said no".to_string()));
    }

    #[test]
    fn test_error_display() {
        let elapsed: TimeoutError<String> = TimeoutError::Elapsed {
            elapsed: Duration::from_secs(5),
        };
        assert!(elapsed.to_string().contains("5s"));

        let inner = TimeoutError::Inner("bad gateway".to_string());
        assert_eq!(inner.to_string(), "bad gateway");
    }
}
