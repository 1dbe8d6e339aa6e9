use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use validator::Validate;

use super::ids::{PromptId, PromptVersionId};
use crate::error::{CoreError, Result};
use crate::traits::TemplateRenderer;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("placeholder pattern is valid"))
}

/// One immutable version of a prompt template.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PromptVersion {
    pub id: PromptVersionId,
    pub prompt_id: PromptId,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub version: i32,
    #[validate(length(min = 1))]
    pub template: String,
    pub variables: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl PromptVersion {
    pub fn new(prompt_id: PromptId, name: String, version: i32, template: String) -> Self {
        let variables = extract_variables(&template);

        Self {
            id: PromptVersionId::new(),
            prompt_id,
            name,
            version,
            template,
            variables,
            created_at: Utc::now(),
        }
    }

    /// The (prompt, version) pair a test matrix selects.
    pub fn selection(&self) -> PromptSelection {
        PromptSelection {
            prompt_id: self.prompt_id,
            version_id: self.id,
        }
    }
}

/// A prompt chosen for a task, pinned to one version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PromptSelection {
    pub prompt_id: PromptId,
    pub version_id: PromptVersionId,
}

/// Distinct `{{variable}}` names in order of first appearance.
pub fn extract_variables(template: &str) -> Vec<String> {
    let mut variables: Vec<String> = Vec::new();
    for cap in placeholder_pattern().captures_iter(template) {
        let name = cap[1].to_string();
        if !variables.contains(&name) {
            variables.push(name);
        }
    }
    variables
}

/// Substitutes `{{variable}}` placeholders with fields of the row object.
///
/// String fields are inserted verbatim, every other JSON value is inserted in
/// its JSON form. A placeholder without a matching field is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, row_data: &serde_json::Value) -> Result<String> {
        let mut missing = None;

        let rendered = placeholder_pattern().replace_all(template, |cap: &regex::Captures<'_>| {
            match row_data.get(&cap[1]) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => {
                    missing.get_or_insert_with(|| cap[1].to_string());
                    String::new()
                }
            }
        });

        match missing {
            Some(var) => Err(CoreError::Render(format!("Missing variable: {}", var))),
            None => Ok(rendered.into_owned()),
        }
    }
}
