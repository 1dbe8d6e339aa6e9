use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::ids::ModelId;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    OpenAI,
    Anthropic,
    Google,
    Azure,
    Local,
    Custom,
}

/// A model the matrix runs prompts against.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ModelTarget {
    pub id: ModelId,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub provider: ModelProvider,
    #[validate(length(min = 1, max = 255))]
    pub model_identifier: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ModelTarget {
    pub fn new(name: String, provider: ModelProvider, model_identifier: String) -> Self {
        Self {
            id: ModelId::new(),
            name,
            provider,
            model_identifier,
            parameters: serde_json::Value::Null,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    pub fn total(&self) -> u64 {
        self.input + self.output
    }
}

/// What a provider call returns for one rendered prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelResponse {
    pub output: String,
    pub latency_ms: u64,
    pub tokens: TokenUsage,
    pub cost: Decimal,
}
