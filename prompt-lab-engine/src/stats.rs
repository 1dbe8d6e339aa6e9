use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::task::{ResultRecord, Task};

/// Figures derived from a task's results. Never stored; recomputed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// `(completed - failed) / total`, 0 for an empty plan.
    pub pass_rate: f64,
    /// Mean latency over settled records.
    pub avg_latency_ms: f64,
    pub total_tokens: u64,
    pub total_cost: Decimal,
}

impl TaskStats {
    /// Aggregates the settled records of `results`; PENDING ones are skipped.
    pub fn compute<'a, I>(results: I, total: usize) -> Self
    where
        I: IntoIterator<Item = &'a ResultRecord>,
    {
        let mut stats = TaskStats {
            total,
            ..Default::default()
        };
        let mut latency_sum: u64 = 0;

        for record in results.into_iter().filter(|record| record.is_settled()) {
            stats.completed += 1;
            if record.status.is_failure() {
                stats.failed += 1;
            }
            latency_sum += record.latency_ms;
            stats.total_tokens += record.tokens.total();
            stats.total_cost += record.cost;
        }

        if total > 0 {
            stats.pass_rate = (stats.completed - stats.failed) as f64 / total as f64;
        }
        if stats.completed > 0 {
            stats.avg_latency_ms = latency_sum as f64 / stats.completed as f64;
        }

        stats
    }

    pub fn succeeded(&self) -> usize {
        self.completed - self.failed
    }
}

pub fn get_stats(task: &Task) -> TaskStats {
    task.stats()
}
