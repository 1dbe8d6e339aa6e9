use prompt_lab_core::WorkItem;

use crate::plan::ExecutionPlan;
use crate::task::Task;

/// Items whose settled result is FAILED, TIMEOUT or ERROR, in plan order.
pub fn failed_items(task: &Task) -> Vec<WorkItem> {
    task.plan
        .iter()
        .filter(|item| {
            task.results
                .get(*item)
                .is_some_and(|record| record.status.is_failure())
        })
        .copied()
        .collect()
}

/// Resets every failed record to PENDING and takes it back out of the
/// progress counters. SUCCESS records are left alone. The returned reduced
/// plan is also installed as the task's run plan.
pub fn prepare_retry(task: &mut Task) -> ExecutionPlan {
    let items = failed_items(task);

    for item in &items {
        if let Some(record) = task.results.get_mut(item) {
            record.reset();
        }
    }
    task.progress.rewind_failed(items.len());

    let plan = ExecutionPlan::from_items(items);
    tracing::debug!(task_id = %task.id, resubmitted = plan.len(), "prepared retry pass");

    task.run_plan = plan.clone();
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ResultRecord, TestMatrix};
    use prompt_lab_core::{
        DatasetRow, ModelProvider, ModelTarget, PromptId, PromptVersion, ResultStatus, RunConfig,
        TaskProgress, TokenUsage,
    };
    use rust_decimal::Decimal;
    use serde_json::json;

    fn task_with(statuses: &[ResultStatus]) -> Task {
        let matrix = TestMatrix::new(
            vec![PromptVersion::new(PromptId::new(), "p".to_string(), 1, "{{x}}".to_string())],
            vec![ModelTarget::new("m".to_string(), ModelProvider::Local, "local-7b".to_string())],
            (0..statuses.len() as i64)
                .map(|i| DatasetRow::new(i, json!({ "x": i })))
                .collect(),
        );
        let mut task = Task::new("retry".to_string(), matrix, RunConfig::default());

        let items: Vec<_> = task.plan.iter().copied().collect();
        for (item, status) in items.into_iter().zip(statuses) {
            let record = match status {
                ResultStatus::Success => {
                    ResultRecord::success(item, "ok".to_string(), 10, TokenUsage::new(1, 1), Decimal::ZERO)
                }
                other => ResultRecord::failure(item, *other, "bad"),
            };
            task.record(record).unwrap();
        }
        task
    }

    #[test]
    fn test_only_failures_are_resubmitted() {
        use ResultStatus::*;
        let mut task = task_with(&[Success, Failed, Timeout, Success, Error]);
        assert_eq!(task.progress, TaskProgress { total: 5, completed: 5, failed: 3 });

        let plan = prepare_retry(&mut task);

        assert_eq!(plan.len(), 3);
        assert_eq!(
            plan.items(),
            &[*task.plan.get(1).unwrap(), *task.plan.get(2).unwrap(), *task.plan.get(4).unwrap()]
        );
        for item in plan.iter() {
            let record = task.result_for(item).unwrap();
            assert_eq!(record.status, Pending);
            assert_eq!(record.error, None);
            assert_eq!(record.output, None);
        }
        assert_eq!(task.result_for(task.plan.get(0).unwrap()).unwrap().status, Success);
        assert_eq!(task.progress, TaskProgress { total: 5, completed: 2, failed: 0 });
        assert_eq!(task.run_plan, plan);
        assert_eq!(task.unsettled(), plan.into_items());
    }

    #[test]
    fn test_nothing_to_resubmit() {
        let mut task = task_with(&[ResultStatus::Success, ResultStatus::Success]);

        let plan = prepare_retry(&mut task);

        assert!(plan.is_empty());
        assert_eq!(task.progress.completed, 2);
    }
}
