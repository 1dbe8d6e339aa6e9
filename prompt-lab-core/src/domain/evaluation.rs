use serde::{Deserialize, Serialize};

/// Verdict of the configured evaluators for one model output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationOutcome {
    pub passed: bool,
    pub score: Option<f64>,
    pub reason: Option<String>,
}

impl EvaluationOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            score: Some(1.0),
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            score: Some(0.0),
            reason: Some(reason.into()),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}
