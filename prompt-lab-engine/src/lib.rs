//! Execution engine for prompt evaluation tasks.
//!
//! A [`Task`] expands a test matrix into an [`ExecutionPlan`] and the
//! [`DefaultTaskEngine`] walks it under a concurrency limit, with per-call
//! retry and timeout, reporting through a [`ProgressChannel`].

pub mod engine;
pub mod executor;
pub mod limiter;
pub mod plan;
pub mod progress;
pub mod resubmit;
pub mod retry;
pub mod state;
pub mod stats;
pub mod store;
pub mod task;
pub mod telemetry;
pub mod timeout;

pub use engine::{DefaultTaskEngine, TaskEngine};
pub use executor::ItemExecutor;
pub use limiter::{ConcurrencyLimiter, LimiterError};
pub use plan::ExecutionPlan;
pub use progress::{ListenerHandle, ProgressChannel, ProgressEvent, ProgressSubscription};
pub use resubmit::prepare_retry;
pub use retry::{execute_with_retry, ExponentialBackoff, RetryError, RetryOptions, RetryPolicy};
pub use stats::{get_stats, TaskStats};
pub use store::{InMemoryTaskRepository, TaskRepository};
pub use task::{ResultRecord, Task, TestMatrix};
pub use timeout::{execute_with_timeout, TimeoutError};
