use async_trait::async_trait;

use crate::domain::{DatasetRow, EvaluationOutcome, ModelId, ModelResponse, WorkItem};
use crate::error::Result;

#[async_trait]
pub trait Repository<T, ID>: Send + Sync {
    async fn find_by_id(&self, id: &ID) -> Result<Option<T>>;
    async fn save(&self, entity: &T) -> Result<T>;
    async fn delete(&self, id: &ID) -> Result<()>;
}

/// Calls a model provider with a rendered prompt.
///
/// Implementations own the network client. Any error is an item-level
/// failure: the engine records it and moves on.
#[async_trait]
pub trait ModelCaller: Send + Sync {
    async fn call(
        &self,
        prompt_content: &str,
        model_id: ModelId,
        row_data: &serde_json::Value,
    ) -> Result<ModelResponse>;
}

/// Materializes prompt content from a template and a dataset row.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &str, row_data: &serde_json::Value) -> Result<String>;
}

/// Turns raw model output into a pass/fail verdict.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        item: &WorkItem,
        output: &str,
        row: &DatasetRow,
    ) -> Result<EvaluationOutcome>;
}

#[async_trait]
pub trait EventPublisher<E: Send + 'static>: Send + Sync {
    async fn publish(&self, event: E) -> Result<()>;
}
