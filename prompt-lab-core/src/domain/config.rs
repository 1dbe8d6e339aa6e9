use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

// ===== Run Configuration =====

/// Execution settings of one task run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum number of work items with an in-flight provider call.
    #[validate(range(min = 1, max = 512))]
    pub concurrency: usize,
    /// Additional attempts after the first failed call.
    #[validate(range(max = 10))]
    pub retry_count: u32,
    /// Delay before the first retry; doubled for every following one.
    pub retry_base_delay_ms: u64,
    /// Upper bound of a single retry delay.
    pub retry_max_delay_ms: u64,
    /// Per-attempt deadline of a provider call.
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
    /// Capacity of the per-task progress broadcast.
    #[validate(range(min = 1, max = 65536))]
    pub progress_buffer: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry_count: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            timeout_ms: 60_000,
            progress_buffer: 256,
        }
    }
}

impl RunConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_retries(mut self, retry_count: u32, base_delay: Duration) -> Self {
        self.retry_count = retry_count;
        self.retry_base_delay_ms = base_delay.as_millis() as u64;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
