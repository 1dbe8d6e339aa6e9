//! Bounded-parallelism admission gate for provider calls.
//!
//! The limiter hands out at most `limit` permits. Waiters are served in the
//! order they first polled `admit` (tokio's semaphore is fair), so a caller
//! that submits sequentially gets FIFO admission. A permit is released when
//! it is dropped, which covers units that fail or panic.

use std::future::Future;
use std::sync::Arc;

use prompt_lab_core::CoreError;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    #[error("Concurrency limit must be at least 1")]
    InvalidLimit,

    #[error("Limiter is closed")]
    Closed,
}

impl From<LimiterError> for CoreError {
    fn from(err: LimiterError) -> Self {
        match err {
            LimiterError::InvalidLimit => CoreError::Validation(err.to_string()),
            LimiterError::Closed => CoreError::Internal(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    limit: usize,
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyLimiter {
    pub fn new(limit: usize) -> Result<Self, LimiterError> {
        if limit == 0 {
            return Err(LimiterError::InvalidLimit);
        }

        Ok(Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Units currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.limit - self.available()
    }

    /// Waits for a free slot. The slot stays taken until the permit drops.
    pub async fn admit(&self) -> Result<OwnedSemaphorePermit, LimiterError> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LimiterError::Closed)
    }

    /// Runs `unit` once a slot is free and releases the slot when it settles.
    pub async fn execute<F, T>(&self, unit: F) -> Result<T, LimiterError>
    where
        F: Future<Output = T>,
    {
        let _permit = self.admit().await?;
        Ok(unit.await)
    }

    /// Wakes every waiter with `LimiterError::Closed`; running units keep their slots.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};

    #[test]
    fn test_zero_limit_is_rejected() {
        assert_eq!(ConcurrencyLimiter::new(0).unwrap_err(), LimiterError::InvalidLimit);
    }

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let limiter = ConcurrencyLimiter::new(3).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .execute(async {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        sleep(Duration::from_millis(20)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.available(), 3);
    }

    #[tokio::test]
    async fn test_admission_is_fifo() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let units = (0..5).map(|i| {
            let limiter = limiter.clone();
            let order = order.clone();
            async move {
                limiter
                    .execute(async {
                        sleep(Duration::from_millis(5)).await;
                        order.lock().unwrap().push(i);
                    })
                    .await
                    .unwrap();
            }
        });
        futures::future::join_all(units).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failed_unit_frees_slot() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();

        let first: Result<Result<(), &str>, _> = limiter.execute(async { Err("boom") }).await;
        assert_eq!(first.unwrap(), Err("boom"));
        assert_eq!(limiter.in_flight(), 0);

        let second = limiter.execute(async { 7 }).await.unwrap();
        assert_eq!(second, 7);
    }

    #[tokio::test]
    async fn test_panicking_unit_frees_slot() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let cloned = limiter.clone();

        let joined = tokio::spawn(async move {
            cloned
                .execute(async {
                    panic!("unit exploded");
                })
                .await
        })
        .await;

        assert!(joined.is_err());
        assert_eq!(limiter.available(), 1);
    }

    #[tokio::test]
    async fn test_close_rejects_waiters() {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        let _held = limiter.admit().await.unwrap();
        limiter.close();

        assert_eq!(limiter.admit().await.unwrap_err(), LimiterError::Closed);
    }
}
