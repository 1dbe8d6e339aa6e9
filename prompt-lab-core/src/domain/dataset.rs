use serde::{Deserialize, Serialize};

use super::ids::DatasetRowId;

/// One row of a dataset: the variables a prompt template is rendered with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatasetRow {
    pub id: DatasetRowId,
    pub index: i64,
    pub data: serde_json::Value,
    pub expected_output: Option<String>,
}

impl DatasetRow {
    pub fn new(index: i64, data: serde_json::Value) -> Self {
        Self {
            id: DatasetRowId::new(),
            index,
            data,
            expected_output: None,
        }
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }
}
