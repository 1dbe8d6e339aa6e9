use async_trait::async_trait;
use chrono::Utc;
use prompt_lab_core::{
    CoreError, DomainEvent, EventBus, Evaluator, ModelCaller, Result, TaskId, TaskStatus,
    TemplateRenderer,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use validator::Validate;

use crate::executor::ItemExecutor;
use crate::limiter::ConcurrencyLimiter;
use crate::progress::{ListenerHandle, ProgressChannel, ProgressEvent, ProgressSubscription};
use crate::resubmit;
use crate::state;
use crate::stats::TaskStats;
use crate::store::TaskRepository;
use crate::task::Task;
use crate::telemetry;

#[async_trait]
pub trait TaskEngine: Send + Sync {
    /// Starts a PENDING task and drives it until it completes, fails, stops
    /// or pauses. Returns the status the run ended in.
    async fn run(&self, task: Task) -> Result<TaskStatus>;
    async fn pause(&self, task_id: TaskId) -> Result<()>;
    /// Continues a PAUSED task with its not-yet-settled items.
    async fn resume(&self, task_id: TaskId) -> Result<TaskStatus>;
    async fn stop(&self, task_id: TaskId) -> Result<()>;
    /// Re-runs the failed items of a finished task. Returns how many were resubmitted.
    async fn retry_failed(&self, task_id: TaskId) -> Result<usize>;
    fn subscribe(&self, task_id: TaskId) -> ProgressSubscription;
    async fn stats(&self, task_id: TaskId) -> Result<TaskStats>;
}

/// Cooperative flags, checked before each item starts.
#[derive(Debug, Default)]
struct RunControl {
    stop: AtomicBool,
    pause: AtomicBool,
}

impl RunControl {
    fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    fn halt_requested(&self) -> bool {
        self.stop_requested() || self.pause_requested()
    }

    fn reset(&self) {
        self.stop.store(false, Ordering::SeqCst);
        self.pause.store(false, Ordering::SeqCst);
    }
}

struct TaskSlot {
    task: Mutex<Task>,
    control: RunControl,
}

impl TaskSlot {
    fn new(task: Task) -> Self {
        Self {
            task: Mutex::new(task),
            control: RunControl::default(),
        }
    }
}

#[derive(Clone)]
pub struct DefaultTaskEngine {
    tasks: Arc<RwLock<HashMap<TaskId, Arc<TaskSlot>>>>,
    executor: ItemExecutor,
    progress: Arc<ProgressChannel>,
    event_bus: Option<EventBus>,
    repository: Option<Arc<dyn TaskRepository>>,
}

impl DefaultTaskEngine {
    pub fn new(caller: Arc<dyn ModelCaller>, progress: Arc<ProgressChannel>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            executor: ItemExecutor::new(caller),
            progress,
            event_bus: None,
            repository: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.executor = self.executor.with_renderer(renderer);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.executor = self.executor.with_evaluator(evaluator);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Checkpoints every task at start, after each settlement and at the end of a run.
    pub fn with_repository(mut self, repository: Arc<dyn TaskRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn progress(&self) -> &Arc<ProgressChannel> {
        &self.progress
    }

    pub fn subscribe_with<F>(&self, task_id: TaskId, listener: F) -> ListenerHandle
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        self.progress.subscribe_with(task_id, listener)
    }

    async fn slot(&self, task_id: TaskId) -> Result<Arc<TaskSlot>> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("Task {} not found", task_id)))
    }

    pub async fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.read().await.keys().copied().collect()
    }

    /// A copy of the task as it is right now.
    pub async fn snapshot(&self, task_id: TaskId) -> Result<Task> {
        let slot = self.slot(task_id).await?;
        let task = slot.task.lock().await;
        Ok(task.clone())
    }

    /// Registers a task restored from a repository without running it. A task
    /// persisted mid-run comes back PAUSED so that `resume` can pick it up.
    pub async fn adopt(&self, mut task: Task) -> Result<TaskStatus> {
        task.config.validate()?;
        if task.status == TaskStatus::Running {
            tracing::warn!("Task {} was interrupted while running, adopting as paused", task.id);
            task.status = TaskStatus::Paused;
        }

        let status = task.status;
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(CoreError::AlreadyExists(format!("Task {}", task.id)));
        }
        tracing::info!("Adopted task {} in status {}", task.id, status);
        tasks.insert(task.id, Arc::new(TaskSlot::new(task)));
        Ok(status)
    }

    /// Breakpoint resume for a STOPPED or FAILED task: runs the items of the
    /// full plan that never settled. Returns the status the run ended in.
    #[tracing::instrument(skip(self), fields(task_id = %task_id))]
    pub async fn resume_interrupted(&self, task_id: TaskId) -> Result<TaskStatus> {
        let slot = self.slot(task_id).await?;
        {
            let mut task = slot.task.lock().await;
            if !matches!(task.status, TaskStatus::Stopped | TaskStatus::Failed) {
                return Err(CoreError::InvalidState(format!(
                    "Task {} is {}, only stopped or failed tasks can be resumed from a breakpoint",
                    task_id, task.status
                )));
            }

            state::reopen(&mut task.status)?;
            task.run_plan = task.plan.clone();
            state::transition(&mut task.status, TaskStatus::Running)?;
            task.error = None;
            task.completed_at = None;
            slot.control.reset();
            tracing::info!(
                "Resuming task {} from breakpoint with {} unsettled items",
                task_id,
                task.unsettled().len()
            );
        }

        Ok(self.drive(slot).await)
    }

    /// Drops a task that is not running and closes its progress stream.
    ///
    /// Finished tasks stay registered so that `snapshot`, `stats` and
    /// `retry_failed` keep working; a long-lived host calls this once it is
    /// done with a task.
    pub async fn forget(&self, task_id: TaskId) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let slot = tasks
            .get(&task_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("Task {} not found", task_id)))?;

        let task = slot.task.lock().await.clone();
        if task.status.is_running() {
            return Err(CoreError::InvalidState(format!("Task {} is running", task_id)));
        }

        tasks.remove(&task_id);
        self.progress.close(task_id);
        tracing::info!("Forgot task {}", task_id);
        Ok(task)
    }

    async fn checkpoint(&self, task: &Task) -> Result<()> {
        match &self.repository {
            Some(repository) => repository.save(task).await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Walks the unsettled items of the run plan. The task must already be RUNNING.
    async fn drive(&self, slot: Arc<TaskSlot>) -> TaskStatus {
        let (task_id, items, config, matrix) = {
            let task = slot.task.lock().await;
            (task.id, task.unsettled(), task.config.clone(), task.matrix.clone())
        };
        tracing::debug!(task_id = %task_id, items = items.len(), "driving task");

        let mut failure: Option<String> = None;
        let mut units: JoinSet<Result<()>> = JoinSet::new();

        match ConcurrencyLimiter::new(config.concurrency) {
            Ok(limiter) => {
                for item in items {
                    let permit = match limiter.admit().await {
                        Ok(permit) => permit,
                        Err(e) => {
                            failure = Some(e.to_string());
                            break;
                        }
                    };

                    while let Some(joined) = units.try_join_next() {
                        note_unit_outcome(&mut failure, joined);
                    }
                    if failure.is_some() || slot.control.halt_requested() {
                        break;
                    }

                    let (Some(prompt), Some(row)) = (
                        matrix.prompt(item.prompt_version_id),
                        matrix.row(item.dataset_row_id),
                    ) else {
                        failure = Some(
                            CoreError::NotFound(format!("Catalog entry for work item {}", item))
                                .to_string(),
                        );
                        break;
                    };
                    if matrix.model(item.model_id).is_none() {
                        failure = Some(
                            CoreError::NotFound(format!("Model {} for work item {}", item.model_id, item))
                                .to_string(),
                        );
                        break;
                    }

                    let template = prompt.template.clone();
                    let row = row.clone();
                    let config = config.clone();
                    let executor = self.executor.clone();
                    let engine = self.clone();
                    let slot = Arc::clone(&slot);

                    units.spawn(async move {
                        let _permit = permit;
                        let record = executor.execute(item, &template, &row, &config).await;

                        let mut task = slot.task.lock().await;
                        task.record(record)?;
                        engine.progress.publish_progress(task.id, task.progress);
                        engine.checkpoint(&task).await
                    });
                }
            }
            Err(e) => failure = Some(e.to_string()),
        }

        while let Some(joined) = units.join_next().await {
            note_unit_outcome(&mut failure, joined);
        }

        self.finish(&slot, failure).await
    }

    async fn finish(&self, slot: &TaskSlot, failure: Option<String>) -> TaskStatus {
        let mut task = slot.task.lock().await;
        let task_id = task.id;

        let target = if failure.is_some() {
            TaskStatus::Failed
        } else if slot.control.stop_requested() {
            TaskStatus::Stopped
        } else if slot.control.pause_requested() && !task.unsettled().is_empty() {
            TaskStatus::Paused
        } else if !task.outstanding().is_empty() {
            // a retry pass over an interrupted run leaves never-started items behind
            tracing::info!(
                "Task {} still has {} never-started items, ending as stopped",
                task_id,
                task.outstanding().len()
            );
            TaskStatus::Stopped
        } else {
            TaskStatus::Completed
        };

        if let Err(e) = state::transition(&mut task.status, target) {
            tracing::error!("Task {} could not finish its run: {}", task_id, e);
            return task.status;
        }

        match target {
            TaskStatus::Failed => {
                let error = failure.unwrap_or_default();
                tracing::error!("Task {} failed: {}", task_id, error);
                task.error = Some(error.clone());
                self.progress.publish_failed(task_id, error);
            }
            TaskStatus::Stopped => {
                tracing::info!("Stopped task {} at {}/{}", task_id, task.progress.completed, task.progress.total);
                self.progress.publish_stopped(task_id);
            }
            TaskStatus::Paused => {
                tracing::info!("Paused task {} at {}/{}", task_id, task.progress.completed, task.progress.total);
                self.progress.publish_paused(task_id, task.progress);
            }
            _ => {
                let stats = task.stats();
                tracing::info!(
                    "Task completed: {} ({} items, pass rate {:.2})",
                    task.name,
                    stats.total,
                    stats.pass_rate
                );
                self.progress.publish_completed(task_id, stats);
            }
        }

        if target.is_terminal() {
            task.completed_at = Some(Utc::now());
            self.progress.close(task_id);
            self.emit(DomainEvent::TaskFinished { task_id, status: target });
        }
        telemetry::record_run(target);

        if let Err(e) = self.checkpoint(&task).await {
            tracing::error!("Failed to checkpoint task {}: {}", task_id, e);
        }

        target
    }

    fn emit(&self, event: DomainEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event);
        }
    }
}

fn note_unit_outcome(
    failure: &mut Option<String>,
    joined: std::result::Result<Result<()>, tokio::task::JoinError>,
) {
    let error = match joined {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e.to_string(),
        Err(e) if e.is_panic() => CoreError::Internal(format!("Work unit panicked: {}", e)).to_string(),
        Err(e) => CoreError::Internal(format!("Work unit aborted: {}", e)).to_string(),
    };

    if failure.is_none() {
        *failure = Some(error);
    } else {
        tracing::warn!("Additional run-level failure: {}", error);
    }
}

#[async_trait]
impl TaskEngine for DefaultTaskEngine {
    #[tracing::instrument(skip(self, task), fields(task_id = %task.id, name = %task.name))]
    async fn run(&self, mut task: Task) -> Result<TaskStatus> {
        task.config.validate()?;
        let task_id = task.id;

        let slot = {
            let mut tasks = self.tasks.write().await;
            if tasks.contains_key(&task_id) {
                return Err(CoreError::AlreadyExists(format!("Task {}", task_id)));
            }

            state::transition(&mut task.status, TaskStatus::Running)?;
            task.started_at = Some(Utc::now());
            self.checkpoint(&task).await?;

            let slot = Arc::new(TaskSlot::new(task));
            tasks.insert(task_id, Arc::clone(&slot));
            slot
        };

        let total = slot.task.lock().await.plan.len();
        tracing::info!("Running task {} with {} work items", task_id, total);
        self.emit(DomainEvent::TaskCreated { task_id, total });

        Ok(self.drive(slot).await)
    }

    #[tracing::instrument(skip(self), fields(task_id = %task_id))]
    async fn pause(&self, task_id: TaskId) -> Result<()> {
        let slot = self.slot(task_id).await?;
        let task = slot.task.lock().await;
        if !state::is_legal(task.status, TaskStatus::Paused) {
            return Err(CoreError::InvalidTransition {
                from: task.status,
                to: TaskStatus::Paused,
            });
        }

        slot.control.request_pause();
        tracing::info!("Pause requested for task {}", task_id);
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(task_id = %task_id))]
    async fn resume(&self, task_id: TaskId) -> Result<TaskStatus> {
        let slot = self.slot(task_id).await?;
        {
            let mut task = slot.task.lock().await;
            if task.status != TaskStatus::Paused {
                return Err(CoreError::InvalidTransition {
                    from: task.status,
                    to: TaskStatus::Running,
                });
            }
            state::transition(&mut task.status, TaskStatus::Running)?;
            slot.control.reset();
            tracing::info!(
                "Resuming task {} at {}/{}",
                task_id,
                task.progress.completed,
                task.progress.total
            );
        }

        Ok(self.drive(slot).await)
    }

    #[tracing::instrument(skip(self), fields(task_id = %task_id))]
    async fn stop(&self, task_id: TaskId) -> Result<()> {
        let slot = self.slot(task_id).await?;
        let mut task = slot.task.lock().await;

        match task.status {
            TaskStatus::Running => {
                slot.control.request_stop();
                tracing::info!("Stop requested for task {}", task_id);
            }
            TaskStatus::Paused => {
                // nothing is in flight; pass through RUNNING without starting an item
                state::transition(&mut task.status, TaskStatus::Running)?;
                state::transition(&mut task.status, TaskStatus::Stopped)?;
                task.completed_at = Some(Utc::now());
                self.progress.publish_stopped(task_id);
                self.progress.close(task_id);
                self.emit(DomainEvent::TaskFinished {
                    task_id,
                    status: TaskStatus::Stopped,
                });
                telemetry::record_run(TaskStatus::Stopped);
                if let Err(e) = self.checkpoint(&task).await {
                    tracing::error!("Failed to checkpoint task {}: {}", task_id, e);
                }
                tracing::info!("Stopped paused task {}", task_id);
            }
            from => {
                return Err(CoreError::InvalidTransition {
                    from,
                    to: TaskStatus::Stopped,
                })
            }
        }

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(task_id = %task_id))]
    async fn retry_failed(&self, task_id: TaskId) -> Result<usize> {
        let slot = self.slot(task_id).await?;
        let resubmitted = {
            let mut task = slot.task.lock().await;
            if !task.status.is_terminal() {
                return Err(CoreError::InvalidState(format!(
                    "Task {} is {}, only finished tasks can retry failures",
                    task_id, task.status
                )));
            }

            if resubmit::failed_items(&task).is_empty() {
                tracing::info!("Task {} has no failed items to retry", task_id);
                return Ok(0);
            }

            state::reopen(&mut task.status)?;
            let plan = resubmit::prepare_retry(&mut task);
            state::transition(&mut task.status, TaskStatus::Running)?;
            task.error = None;
            task.completed_at = None;
            slot.control.reset();

            self.progress.publish_progress(task_id, task.progress);
            tracing::info!("Retrying {} failed items of task {}", plan.len(), task_id);
            plan.len()
        };

        self.drive(slot).await;
        Ok(resubmitted)
    }

    fn subscribe(&self, task_id: TaskId) -> ProgressSubscription {
        self.progress.subscribe(task_id)
    }

    async fn stats(&self, task_id: TaskId) -> Result<TaskStats> {
        let slot = self.slot(task_id).await?;
        let task = slot.task.lock().await;
        Ok(task.stats())
    }
}
