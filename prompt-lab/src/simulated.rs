//! Offline stand-ins for a model provider and an evaluator.

use async_trait::async_trait;
use prompt_lab_core::{
    CoreError, DatasetRow, EvaluationOutcome, Evaluator, ModelCaller, ModelId, ModelResponse,
    Result, TokenUsage, WorkItem,
};
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;

use crate::config::SimulationConfig;

/// Echoes the prompt back after a random delay and fails at the configured rate.
pub struct SimulatedModelCaller {
    config: SimulationConfig,
}

impl SimulatedModelCaller {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// NaN counts as never failing.
    fn failure_probability(&self) -> f64 {
        let rate = self.config.failure_rate;
        if rate.is_nan() {
            0.0
        } else {
            rate.clamp(0.0, 1.0)
        }
    }

    fn estimate_tokens(text: &str) -> u64 {
        (text.chars().count() as u64).div_ceil(4).max(1)
    }
}

#[async_trait]
impl ModelCaller for SimulatedModelCaller {
    async fn call(
        &self,
        prompt_content: &str,
        model_id: ModelId,
        _row_data: &serde_json::Value,
    ) -> Result<ModelResponse> {
        let (latency_ms, fails) = {
            let mut rng = rand::thread_rng();
            let min = self.config.min_latency_ms;
            let max = self.config.max_latency_ms.max(min);
            (
                rng.gen_range(min..=max),
                rng.gen_bool(self.failure_probability()),
            )
        };

        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        if fails {
            return Err(CoreError::Provider(format!(
                "simulated provider error for model {}",
                model_id
            )));
        }

        let output = format!("Echo: {}", prompt_content);
        let tokens = TokenUsage::new(
            Self::estimate_tokens(prompt_content),
            Self::estimate_tokens(&output),
        );
        let cost = Decimal::from_f64(tokens.total() as f64 / 1000.0 * self.config.cost_per_1k_tokens)
            .unwrap_or_default()
            .round_dp(6);

        Ok(ModelResponse {
            output,
            latency_ms,
            tokens,
            cost,
        })
    }
}

/// Passes when the output contains the row's expected output, ignoring case.
/// Rows without an expected output always pass.
#[derive(Debug, Default)]
pub struct ContainsExpectedEvaluator;

#[async_trait]
impl Evaluator for ContainsExpectedEvaluator {
    async fn evaluate(&self, _item: &WorkItem, output: &str, row: &DatasetRow) -> Result<EvaluationOutcome> {
        let Some(expected) = &row.expected_output else {
            return Ok(EvaluationOutcome::pass());
        };

        if output.to_lowercase().contains(&expected.to_lowercase()) {
            Ok(EvaluationOutcome::pass())
        } else {
            Ok(EvaluationOutcome::fail(format!("expected output to contain {:?}", expected)))
        }
    }
}
