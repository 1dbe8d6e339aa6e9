//! On-disk description of a test matrix.

use anyhow::{bail, Context as _, Result};
use prompt_lab_core::{DatasetRow, ModelProvider, ModelTarget, PromptId, PromptVersion};
use prompt_lab_engine::TestMatrix;
use serde::Deserialize;
use std::path::Path;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct MatrixFile {
    pub name: String,
    pub prompts: Vec<PromptEntry>,
    pub models: Vec<ModelEntry>,
    pub rows: Vec<RowEntry>,
}

#[derive(Debug, Deserialize)]
pub struct PromptEntry {
    pub name: String,
    #[serde(default = "first_version")]
    pub version: i32,
    pub template: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    pub provider: ModelProvider,
    pub model_identifier: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct RowEntry {
    pub data: serde_json::Value,
    #[serde(default)]
    pub expected_output: Option<String>,
}

fn first_version() -> i32 {
    1
}

impl MatrixFile {
    pub async fn read(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading matrix file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing matrix file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn into_matrix(self) -> Result<(String, TestMatrix)> {
        let mut prompts = Vec::with_capacity(self.prompts.len());
        for entry in self.prompts {
            let prompt = PromptVersion::new(PromptId::new(), entry.name, entry.version, entry.template);
            prompt.validate()?;
            prompts.push(prompt);
        }

        let mut models = Vec::with_capacity(self.models.len());
        for entry in self.models {
            let model = ModelTarget::new(entry.name, entry.provider, entry.model_identifier)
                .with_parameters(entry.parameters);
            model.validate()?;
            models.push(model);
        }

        let rows: Vec<DatasetRow> = self
            .rows
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                let row = DatasetRow::new(index as i64, entry.data);
                match entry.expected_output {
                    Some(expected) => row.with_expected_output(expected),
                    None => row,
                }
            })
            .collect();

        if let Some(row) = rows.iter().find(|row| !row.data.is_object()) {
            bail!("dataset row {} is not a JSON object", row.index);
        }

        Ok((self.name, TestMatrix::new(prompts, models, rows)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "name": "capitals",
        "prompts": [
            { "name": "direct", "template": "Capital of {{country}}?" },
            { "name": "polite", "version": 2, "template": "Please name the capital of {{country}}." }
        ],
        "models": [
            { "name": "gpt", "provider": "openai", "model_identifier": "gpt-4o-mini" },
            { "name": "claude", "provider": "anthropic", "model_identifier": "claude-3-haiku" }
        ],
        "rows": [
            { "data": { "country": "France" }, "expected_output": "Paris" },
            { "data": { "country": "Japan" }, "expected_output": "Tokyo" },
            { "data": { "country": "Peru" } }
        ]
    }"#;

    #[test]
    fn test_sample_matrix_expands_to_full_plan() {
        let (name, matrix) = MatrixFile::parse(SAMPLE).unwrap().into_matrix().unwrap();

        assert_eq!(name, "capitals");
        assert_eq!(matrix.prompts[1].version, 2);
        assert_eq!(matrix.prompts[0].variables, vec!["country".to_string()]);
        assert_eq!(matrix.rows[2].index, 2);
        assert_eq!(matrix.rows[0].expected_output.as_deref(), Some("Paris"));
        assert_eq!(matrix.plan().len(), 12);
    }

    #[test]
    fn test_non_object_row_is_rejected() {
        let raw = r#"{ "name": "bad", "prompts": [], "models": [], "rows": [ { "data": 5 } ] }"#;
        assert!(MatrixFile::parse(raw).unwrap().into_matrix().is_err());
    }

    #[test]
    fn test_empty_template_is_rejected() {
        let raw = r#"{ "name": "bad", "prompts": [ { "name": "p", "template": "" } ], "models": [], "rows": [] }"#;
        assert!(MatrixFile::parse(raw).unwrap().into_matrix().is_err());
    }
}
