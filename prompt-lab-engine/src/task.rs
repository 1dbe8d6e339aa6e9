use chrono::{DateTime, Utc};
use prompt_lab_core::{
    CoreError, DatasetRow, DatasetRowId, EvaluationOutcome, ModelId, ModelTarget, PromptSelection,
    PromptVersion, PromptVersionId, Result, ResultStatus, RunConfig, TaskId, TaskProgress,
    TaskStatus, TokenUsage, WorkItem,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::plan::ExecutionPlan;
use crate::stats::TaskStats;

/// The catalog entries a task runs against: prompt versions x models x rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestMatrix {
    pub prompts: Vec<PromptVersion>,
    pub models: Vec<ModelTarget>,
    pub rows: Vec<DatasetRow>,
}

impl TestMatrix {
    pub fn new(prompts: Vec<PromptVersion>, models: Vec<ModelTarget>, rows: Vec<DatasetRow>) -> Self {
        Self { prompts, models, rows }
    }

    pub fn selections(&self) -> Vec<PromptSelection> {
        self.prompts.iter().map(PromptVersion::selection).collect()
    }

    pub fn model_ids(&self) -> Vec<ModelId> {
        self.models.iter().map(|model| model.id).collect()
    }

    pub fn prompt(&self, version_id: PromptVersionId) -> Option<&PromptVersion> {
        self.prompts.iter().find(|prompt| prompt.id == version_id)
    }

    pub fn model(&self, model_id: ModelId) -> Option<&ModelTarget> {
        self.models.iter().find(|model| model.id == model_id)
    }

    pub fn row(&self, row_id: DatasetRowId) -> Option<&DatasetRow> {
        self.rows.iter().find(|row| row.id == row_id)
    }

    pub fn plan(&self) -> ExecutionPlan {
        ExecutionPlan::build(&self.selections(), &self.model_ids(), &self.rows)
    }
}

/// Outcome of one work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultRecord {
    pub work_item: WorkItem,
    pub status: ResultStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub latency_ms: u64,
    pub tokens: TokenUsage,
    pub cost: Decimal,
    /// Provider calls made, retries included.
    pub attempts: u32,
    pub evaluation: Option<EvaluationOutcome>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl ResultRecord {
    pub fn success(work_item: WorkItem, output: String, latency_ms: u64, tokens: TokenUsage, cost: Decimal) -> Self {
        Self {
            work_item,
            status: ResultStatus::Success,
            output: Some(output),
            error: None,
            latency_ms,
            tokens,
            cost,
            attempts: 1,
            evaluation: None,
            settled_at: Some(Utc::now()),
        }
    }

    /// A settled record without usable output. `status` must be a failure kind.
    pub fn failure(work_item: WorkItem, status: ResultStatus, error: impl Into<String>) -> Self {
        debug_assert!(status.is_failure());
        Self {
            work_item,
            status,
            output: None,
            error: Some(error.into()),
            latency_ms: 0,
            tokens: TokenUsage::default(),
            cost: Decimal::ZERO,
            attempts: 1,
            evaluation: None,
            settled_at: Some(Utc::now()),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_evaluation(mut self, evaluation: EvaluationOutcome) -> Self {
        self.evaluation = Some(evaluation);
        self
    }

    /// Back to PENDING for a retry pass. Usage figures of the failed attempt are kept.
    pub fn reset(&mut self) {
        self.status = ResultStatus::Pending;
        self.output = None;
        self.error = None;
        self.evaluation = None;
        self.settled_at = None;
    }

    pub fn is_settled(&self) -> bool {
        self.status.is_settled()
    }
}

/// One evaluation run over a test matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub config: RunConfig,
    pub matrix: TestMatrix,
    pub plan: ExecutionPlan,
    /// What the current or last run walks: the full plan or a reduced retry plan.
    pub run_plan: ExecutionPlan,
    #[serde(with = "results_as_list")]
    pub results: HashMap<WorkItem, ResultRecord>,
    /// Run-level failure message.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(name: String, matrix: TestMatrix, config: RunConfig) -> Self {
        let plan = matrix.plan();

        Self {
            id: TaskId::new(),
            name,
            status: TaskStatus::Pending,
            progress: TaskProgress::new(plan.len()),
            config,
            matrix,
            run_plan: plan.clone(),
            plan,
            results: HashMap::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn result_for(&self, item: &WorkItem) -> Option<&ResultRecord> {
        self.results.get(item)
    }

    /// Results in plan order.
    pub fn ordered_results(&self) -> Vec<&ResultRecord> {
        self.plan.iter().filter_map(|item| self.results.get(item)).collect()
    }

    /// Stores a settled record and counts it. An item settles at most once per
    /// pass: only a PENDING record may be overwritten.
    pub fn record(&mut self, record: ResultRecord) -> Result<()> {
        if !record.is_settled() {
            return Err(CoreError::Validation(format!(
                "Result for {} is not settled",
                record.work_item
            )));
        }

        if let Some(existing) = self.results.get(&record.work_item) {
            if existing.is_settled() {
                return Err(CoreError::AlreadyExists(format!(
                    "Result for {}",
                    record.work_item
                )));
            }
        }

        self.progress.record(record.status);
        self.results.insert(record.work_item, record);
        Ok(())
    }

    /// Items of the run plan that have no settled result yet, in plan order.
    pub fn unsettled(&self) -> Vec<WorkItem> {
        self.run_plan
            .iter()
            .filter(|item| !self.results.get(*item).is_some_and(ResultRecord::is_settled))
            .copied()
            .collect()
    }

    /// Items of the full plan that have no settled result yet. Differs from
    /// [`Task::unsettled`] while a retry pass has narrowed the run plan.
    pub fn outstanding(&self) -> Vec<WorkItem> {
        self.plan
            .iter()
            .filter(|item| !self.results.get(*item).is_some_and(ResultRecord::is_settled))
            .copied()
            .collect()
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats::compute(self.results.values(), self.progress.total)
    }
}

/// JSON objects only take string keys, so results travel as a list.
mod results_as_list {
    use super::ResultRecord;
    use prompt_lab_core::WorkItem;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S>(results: &HashMap<WorkItem, ResultRecord>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(results.values())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<WorkItem, ResultRecord>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let records = Vec::<ResultRecord>::deserialize(deserializer)?;
        Ok(records.into_iter().map(|record| (record.work_item, record)).collect())
    }
}
