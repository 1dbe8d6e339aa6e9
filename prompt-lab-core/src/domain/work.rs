use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{DatasetRowId, ModelId, PromptId, PromptVersionId};

/// One (prompt version, model, dataset row) combination to execute.
///
/// The 4-tuple is the identity: no two items of one plan compare equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub prompt_id: PromptId,
    pub prompt_version_id: PromptVersionId,
    pub model_id: ModelId,
    pub dataset_row_id: DatasetRowId,
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.prompt_version_id, self.model_id, self.dataset_row_id
        )
    }
}

// ===== Task Status =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self, TaskStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ===== Result Status =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    /// Reset for a retry pass and not yet settled again.
    Pending,
    Success,
    /// The call succeeded but the evaluators rejected the output.
    Failed,
    Timeout,
    Error,
}

impl ResultStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, ResultStatus::Pending)
    }

    /// Counted in `TaskProgress::failed` and picked up by a retry pass.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ResultStatus::Failed | ResultStatus::Timeout | ResultStatus::Error
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Pending => "PENDING",
            ResultStatus::Success => "SUCCESS",
            ResultStatus::Failed => "FAILED",
            ResultStatus::Timeout => "TIMEOUT",
            ResultStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ===== Progress =====

/// Aggregate counters of a task. `completed` counts every settled item,
/// `failed` the settled items that did not succeed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskProgress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
        }
    }

    pub fn record(&mut self, status: ResultStatus) {
        self.completed += 1;
        if status.is_failure() {
            self.failed += 1;
        }
    }

    /// Takes back `count` failed settlements ahead of a retry pass.
    pub fn rewind_failed(&mut self, count: usize) {
        let count = count.min(self.failed);
        self.completed -= count;
        self.failed -= count;
    }

    pub fn succeeded(&self) -> usize {
        self.completed - self.failed
    }

    pub fn is_finished(&self) -> bool {
        self.completed >= self.total
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_record_and_rewind() {
        let mut progress = TaskProgress::new(4);
        progress.record(ResultStatus::Success);
        progress.record(ResultStatus::Timeout);
        progress.record(ResultStatus::Error);
        assert_eq!(progress, TaskProgress { total: 4, completed: 3, failed: 2 });

        progress.rewind_failed(2);
        assert_eq!(progress, TaskProgress { total: 4, completed: 1, failed: 0 });
        assert_eq!(progress.succeeded(), 1);
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(serde_json::to_string(&TaskStatus::Completed).unwrap(), "\"COMPLETED\"");
        assert_eq!(serde_json::to_string(&ResultStatus::Timeout).unwrap(), "\"TIMEOUT\"");
    }
}
