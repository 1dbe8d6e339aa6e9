//! Expansion of a test matrix into the ordered list of work items.

use std::collections::HashSet;

use prompt_lab_core::{DatasetRow, DatasetRowId, ModelId, PromptId, PromptSelection, PromptVersionId, WorkItem};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Ordered work items of a task: prompt-major, then model, then dataset row
/// index. Building twice from the same inputs yields the same plan, so a
/// position in it survives a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionPlan {
    items: Vec<WorkItem>,
}

impl ExecutionPlan {
    /// Cartesian product of the selections. Repeated selections collapse onto
    /// their first occurrence; any empty input gives an empty plan.
    pub fn build(
        prompts: &[PromptSelection],
        model_ids: &[ModelId],
        rows: &[DatasetRow],
    ) -> Self {
        let mut ordered_rows: Vec<&DatasetRow> = rows.iter().collect();
        ordered_rows.sort_by_key(|row| row.index);

        let mut seen = HashSet::new();
        let mut items = Vec::with_capacity(prompts.len() * model_ids.len() * rows.len());

        for prompt in prompts {
            for model_id in model_ids {
                for row in &ordered_rows {
                    let item = WorkItem {
                        prompt_id: prompt.prompt_id,
                        prompt_version_id: prompt.version_id,
                        model_id: *model_id,
                        dataset_row_id: row.id,
                    };
                    if seen.insert(item) {
                        items.push(item);
                    }
                }
            }
        }

        tracing::debug!(
            prompts = prompts.len(),
            models = model_ids.len(),
            rows = rows.len(),
            items = items.len(),
            "built execution plan"
        );

        Self { items }
    }

    /// Wraps items that are already ordered, e.g. a reduced retry plan.
    pub fn from_items(items: Vec<WorkItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<WorkItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WorkItem> {
        self.items.iter()
    }

    pub fn get(&self, position: usize) -> Option<&WorkItem> {
        self.items.get(position)
    }

    pub fn position(&self, item: &WorkItem) -> Option<usize> {
        self.items.iter().position(|candidate| candidate == item)
    }

    pub fn contains(&self, item: &WorkItem) -> bool {
        self.position(item).is_some()
    }

    /// Sub-plan of the items matching `predicate`, in plan order.
    pub fn filter<P>(&self, mut predicate: P) -> Self
    where
        P: FnMut(&WorkItem) -> bool,
    {
        Self {
            items: self.items.iter().copied().filter(|item| predicate(item)).collect(),
        }
    }

    pub fn filter_by_prompt(&self, prompt_id: PromptId) -> Self {
        self.filter(|item| item.prompt_id == prompt_id)
    }

    pub fn filter_by_prompt_version(&self, version_id: PromptVersionId) -> Self {
        self.filter(|item| item.prompt_version_id == version_id)
    }

    pub fn filter_by_model(&self, model_id: ModelId) -> Self {
        self.filter(|item| item.model_id == model_id)
    }

    pub fn filter_by_row(&self, row_id: DatasetRowId) -> Self {
        self.filter(|item| item.dataset_row_id == row_id)
    }

    /// Hex SHA-256 over the item identities in order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for item in &self.items {
            hasher.update(item.prompt_id.as_uuid().as_bytes());
            hasher.update(item.prompt_version_id.as_uuid().as_bytes());
            hasher.update(item.model_id.as_uuid().as_bytes());
            hasher.update(item.dataset_row_id.as_uuid().as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

impl<'a> IntoIterator for &'a ExecutionPlan {
    type Item = &'a WorkItem;
    type IntoIter = std::slice::Iter<'a, WorkItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
