use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use prompt_lab_core::{
    DatasetRow, Evaluator, ModelCaller, PlaceholderRenderer, ResultStatus, RunConfig,
    TemplateRenderer, WorkItem,
};

use crate::retry::{retry, ExponentialBackoff, RetryOptions};
use crate::task::ResultRecord;
use crate::telemetry;
use crate::timeout::{execute_with_timeout, TimeoutError};

/// Runs one work item: render, call the model under retry and timeout, then
/// evaluate. Every outcome is folded into a [`ResultRecord`]; nothing here
/// fails the run.
#[derive(Clone)]
pub struct ItemExecutor {
    caller: Arc<dyn ModelCaller>,
    renderer: Arc<dyn TemplateRenderer>,
    evaluator: Option<Arc<dyn Evaluator>>,
}

impl ItemExecutor {
    pub fn new(caller: Arc<dyn ModelCaller>) -> Self {
        Self {
            caller,
            renderer: Arc::new(PlaceholderRenderer),
            evaluator: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub async fn execute(
        &self,
        item: WorkItem,
        template: &str,
        row: &DatasetRow,
        config: &RunConfig,
    ) -> ResultRecord {
        let started = Instant::now();

        let content = match self.renderer.render(template, &row.data) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(%item, error = %e, "render failed");
                return Self::finish(ResultRecord::failure(item, ResultStatus::Error, e.to_string()).with_attempts(0));
            }
        };

        let policy = ExponentialBackoff::new(RetryOptions::new(
            config.retry_count,
            config.retry_base_delay(),
        ))
        .with_max_delay(config.retry_max_delay());
        let deadline = config.timeout();

        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let caller: &dyn ModelCaller = self.caller.as_ref();
        let content: &str = &content;
        let data = &row.data;

        let outcome = retry(&policy, move || {
            attempts_ref.fetch_add(1, Ordering::Relaxed);
            execute_with_timeout(deadline, caller.call(content, item.model_id, data))
        })
        .await;
        let attempts = attempts.load(Ordering::Relaxed);

        let response = match outcome {
            Ok(response) => response,
            Err(exhausted) => {
                let mut record = match exhausted.into_inner() {
                    TimeoutError::Elapsed { elapsed } => ResultRecord::failure(
                        item,
                        ResultStatus::Timeout,
                        format!("Model call timed out after {}ms", elapsed.as_millis()),
                    ),
                    TimeoutError::Inner(e) => ResultRecord::failure(item, ResultStatus::Error, e.to_string()),
                };
                record.latency_ms = started.elapsed().as_millis() as u64;
                record.attempts = attempts;
                tracing::debug!(%item, status = %record.status, attempts, "item failed");
                return Self::finish(record);
            }
        };

        let output = response.output.clone();
        let mut record = ResultRecord::success(
            item,
            response.output,
            response.latency_ms,
            response.tokens,
            response.cost,
        )
        .with_attempts(attempts);

        if let Some(evaluator) = &self.evaluator {
            match evaluator.evaluate(&item, &output, row).await {
                Ok(verdict) => {
                    if !verdict.passed {
                        record.status = ResultStatus::Failed;
                        record.error = Some(
                            verdict
                                .reason
                                .clone()
                                .unwrap_or_else(|| "Output rejected by evaluator".to_string()),
                        );
                    }
                    record.evaluation = Some(verdict);
                }
                Err(e) => {
                    record.status = ResultStatus::Error;
                    record.error = Some(e.to_string());
                }
            }
        }

        tracing::debug!(%item, status = %record.status, attempts, "item settled");
        Self::finish(record)
    }

    fn finish(record: ResultRecord) -> ResultRecord {
        telemetry::record_item(record.status, record.latency_ms);
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use prompt_lab_core::{
        CoreError, DatasetRowId, EvaluationOutcome, ModelId, ModelResponse, PromptId, PromptVersionId, Result,
        TokenUsage,
    };
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted answers, one per call; the last one repeats.
    struct ScriptedCaller {
        script: Mutex<Vec<Result<ModelResponse>>>,
        delay: Duration,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedCaller {
        fn new(script: Vec<Result<ModelResponse>>) -> Self {
            Self {
                script: Mutex::new(script),
                delay: Duration::ZERO,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }
    }

    #[async_trait]
    impl ModelCaller for ScriptedCaller {
        async fn call(&self, prompt_content: &str, _model_id: ModelId, _row: &Value) -> Result<ModelResponse> {
            self.prompts.lock().unwrap().push(prompt_content.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    struct ExactMatch;

    #[async_trait]
    impl Evaluator for ExactMatch {
        async fn evaluate(&self, _item: &WorkItem, output: &str, row: &DatasetRow) -> Result<EvaluationOutcome> {
            match &row.expected_output {
                Some(expected) if expected == output => Ok(EvaluationOutcome::pass()),
                Some(_) => Ok(EvaluationOutcome::fail("mismatch")),
                None => Err(CoreError::Evaluation("no expected output".to_string())),
            }
        }
    }

    fn response(output: &str) -> ModelResponse {
        ModelResponse {
            output: output.to_string(),
            latency_ms: 120,
            tokens: TokenUsage::new(10, 5),
            cost: Decimal::new(3, 3),
        }
    }

    fn item() -> WorkItem {
        WorkItem {
            prompt_id: PromptId::new(),
            prompt_version_id: PromptVersionId::new(),
            model_id: ModelId::new(),
            dataset_row_id: DatasetRowId::new(),
        }
    }

    fn config() -> RunConfig {
        RunConfig::default()
            .with_retries(2, Duration::from_millis(10))
            .with_timeout(Duration::from_millis(50))
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_renders_and_records_usage() {
        let caller = Arc::new(ScriptedCaller::new(vec![Ok(response("4"))]));
        let executor = ItemExecutor::new(caller.clone());
        let row = DatasetRow::new(0, json!({ "a": 2, "b": 2 }));

        let record = executor.execute(item(), "{{a}}+{{b}}=", &row, &config()).await;

        assert_eq!(record.status, ResultStatus::Success);
        assert_eq!(record.output.as_deref(), Some("4"));
        assert_eq!(record.latency_ms, 120);
        assert_eq!(record.tokens.total(), 15);
        assert_eq!(record.attempts, 1);
        assert_eq!(*caller.prompts.lock().unwrap(), vec!["2+2=".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let caller = Arc::new(ScriptedCaller::new(vec![
            Err(CoreError::Provider("503".to_string())),
            Err(CoreError::Provider("503".to_string())),
            Ok(response("fine")),
        ]));
        let executor = ItemExecutor::new(caller);

        let record = executor.execute(item(), "hi", &DatasetRow::new(0, json!({})), &config()).await;

        assert_eq!(record.status, ResultStatus::Success);
        assert_eq!(record.attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_errors_become_error_records() {
        let caller = Arc::new(ScriptedCaller::new(vec![Err(CoreError::Provider("bad key".to_string()))]));
        let executor = ItemExecutor::new(caller);

        let record = executor.execute(item(), "hi", &DatasetRow::new(0, json!({})), &config()).await;

        assert_eq!(record.status, ResultStatus::Error);
        assert_eq!(record.attempts, 3);
        assert!(record.error.unwrap().contains("bad key"));
        assert!(record.output.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_calls_become_timeouts() {
        let caller = Arc::new(ScriptedCaller::new(vec![Ok(response("late"))]).slow(Duration::from_millis(200)));
        let executor = ItemExecutor::new(caller);

        let record = executor.execute(item(), "hi", &DatasetRow::new(0, json!({})), &config()).await;

        assert_eq!(record.status, ResultStatus::Timeout);
        assert_eq!(record.attempts, 3);
        assert!(record.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_render_failure_skips_the_call() {
        let caller = Arc::new(ScriptedCaller::new(vec![Ok(response("unused"))]));
        let executor = ItemExecutor::new(caller.clone());

        let record = executor.execute(item(), "{{missing}}", &DatasetRow::new(0, json!({})), &config()).await;

        assert_eq!(record.status, ResultStatus::Error);
        assert_eq!(record.attempts, 0);
        assert!(caller.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evaluator_verdicts() {
        let caller = Arc::new(ScriptedCaller::new(vec![Ok(response("Paris"))]));
        let executor = ItemExecutor::new(caller).with_evaluator(Arc::new(ExactMatch));

        let pass_row = DatasetRow::new(0, json!({})).with_expected_output("Paris");
        let fail_row = DatasetRow::new(1, json!({})).with_expected_output("Rome");
        let broken_row = DatasetRow::new(2, json!({}));

        let passed = executor.execute(item(), "q", &pass_row, &config()).await;
        let rejected = executor.execute(item(), "q", &fail_row, &config()).await;
        let errored = executor.execute(item(), "q", &broken_row, &config()).await;

        assert_eq!(passed.status, ResultStatus::Success);
        assert!(passed.evaluation.unwrap().passed);

        assert_eq!(rejected.status, ResultStatus::Failed);
        assert_eq!(rejected.error.as_deref(), Some("mismatch"));
        assert_eq!(rejected.output.as_deref(), Some("Paris"));

        assert_eq!(errored.status, ResultStatus::Error);
        assert_eq!(errored.output.as_deref(), Some("Paris"));
        assert!(errored.evaluation.is_none());
    }
}
