use async_trait::async_trait;
use prompt_lab_core::{CoreError, Repository, Result, TaskId};
use prompt_lab_engine::{Task, TaskRepository};
use std::path::{Path, PathBuf};

/// Keeps one JSON document per task under a directory.
///
/// A save writes a sibling temp file and renames it over the old checkpoint,
/// so a reader never sees a half-written task.
#[derive(Debug, Clone)]
pub struct FileTaskRepository {
    dir: PathBuf,
}

impl FileTaskRepository {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> CoreError {
    CoreError::Internal(format!("{}: {}", path.display(), err))
}

#[async_trait]
impl Repository<Task, TaskId> for FileTaskRepository {
    async fn find_by_id(&self, id: &TaskId) -> Result<Option<Task>> {
        let path = self.path_for(id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    async fn save(&self, entity: &Task) -> Result<Task> {
        let path = self.path_for(&entity.id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(entity)?;

        tokio::fs::write(&tmp, bytes).await.map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path).await.map_err(|e| io_error(&path, e))?;
        tracing::trace!(task_id = %entity.id, completed = entity.progress.completed, "checkpoint written");
        Ok(entity.clone())
    }

    async fn delete(&self, id: &TaskId) -> Result<()> {
        let path = self.path_for(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

#[async_trait]
impl TaskRepository for FileTaskRepository {
    async fn list(&self) -> Result<Vec<Task>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&self.dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await.map_err(|e| io_error(&path, e))?;
            tasks.push(serde_json::from_slice::<Task>(&bytes)?);
        }

        tasks.sort_by_key(|task| task.created_at);
        Ok(tasks)
    }
}
