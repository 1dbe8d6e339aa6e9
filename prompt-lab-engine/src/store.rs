use async_trait::async_trait;
use dashmap::DashMap;
use prompt_lab_core::{Repository, Result, TaskId};

use crate::task::Task;

/// Where the engine checkpoints tasks: after start, after every settlement
/// and when a run ends.
#[async_trait]
pub trait TaskRepository: Repository<Task, TaskId> {
    async fn list(&self) -> Result<Vec<Task>>;
}

#[derive(Debug, Default)]
pub struct InMemoryTaskRepository {
    tasks: DashMap<TaskId, Task>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl Repository<Task, TaskId> for InMemoryTaskRepository {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.get(id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, entity: &Task) -> Result<Task> {
        self.tasks.insert(entity.id, entity.clone());
        Ok(entity.clone())
    }

    async fn delete(&self, id: &TaskId) -> Result<()> {
        self.tasks.remove(id);
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn list(&self) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|entry| entry.value().clone()).collect();
        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }
}
