//! Per-task progress notifications.
//!
//! One [`ProgressChannel`] is built by the host and handed to the engine.
//! Each task gets its own broadcast sender, created on first use and dropped
//! by the engine once the task reaches a terminal state. Delivery is
//! at-most-once to whoever is subscribed at publish time; a subscriber that
//! falls behind skips what it missed.

use std::panic::{catch_unwind, AssertUnwindSafe};

use dashmap::DashMap;
use prompt_lab_core::{TaskId, TaskProgress, TaskStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;

use crate::stats::TaskStats;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress {
        task_id: TaskId,
        total: usize,
        completed: usize,
        failed: usize,
    },
    Completed {
        task_id: TaskId,
        status: TaskStatus,
        stats: TaskStats,
    },
    Failed {
        task_id: TaskId,
        status: TaskStatus,
        error: String,
    },
    Stopped {
        task_id: TaskId,
        status: TaskStatus,
    },
    Paused {
        task_id: TaskId,
        status: TaskStatus,
        total: usize,
        completed: usize,
        failed: usize,
    },
}

impl ProgressEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            ProgressEvent::Progress { task_id, .. }
            | ProgressEvent::Completed { task_id, .. }
            | ProgressEvent::Failed { task_id, .. }
            | ProgressEvent::Stopped { task_id, .. }
            | ProgressEvent::Paused { task_id, .. } => *task_id,
        }
    }

    /// True for the event that ends a run.
    pub fn is_final(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Progress { .. } => "progress",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Failed { .. } => "failed",
            ProgressEvent::Stopped { .. } => "stopped",
            ProgressEvent::Paused { .. } => "paused",
        }
    }
}

pub struct ProgressChannel {
    capacity: usize,
    senders: DashMap<TaskId, broadcast::Sender<ProgressEvent>>,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            senders: DashMap::new(),
        }
    }

    fn sender(&self, task_id: TaskId) -> broadcast::Sender<ProgressEvent> {
        self.senders
            .entry(task_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .value()
            .clone()
    }

    pub fn subscribe(&self, task_id: TaskId) -> ProgressSubscription {
        ProgressSubscription {
            task_id,
            receiver: self.sender(task_id).subscribe(),
        }
    }

    /// Runs `listener` for every event of the task on its own tokio task.
    /// A panicking listener is logged and keeps receiving.
    pub fn subscribe_with<F>(&self, task_id: TaskId, listener: F) -> ListenerHandle
    where
        F: Fn(&ProgressEvent) + Send + Sync + 'static,
    {
        let mut subscription = self.subscribe(task_id);

        let handle = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                    tracing::error!(
                        task_id = %task_id,
                        event = event.kind(),
                        "progress listener panicked"
                    );
                }
            }
        });

        ListenerHandle { task_id, handle }
    }

    /// Delivers to current subscribers and returns how many got it.
    pub fn publish(&self, event: ProgressEvent) -> usize {
        let Some(sender) = self.senders.get(&event.task_id()).map(|entry| entry.value().clone()) else {
            return 0;
        };
        sender.send(event).unwrap_or(0)
    }

    pub fn publish_progress(&self, task_id: TaskId, progress: TaskProgress) -> usize {
        self.publish(ProgressEvent::Progress {
            task_id,
            total: progress.total,
            completed: progress.completed,
            failed: progress.failed,
        })
    }

    pub fn publish_completed(&self, task_id: TaskId, stats: TaskStats) -> usize {
        self.publish(ProgressEvent::Completed {
            task_id,
            status: TaskStatus::Completed,
            stats,
        })
    }

    pub fn publish_failed(&self, task_id: TaskId, error: impl Into<String>) -> usize {
        self.publish(ProgressEvent::Failed {
            task_id,
            status: TaskStatus::Failed,
            error: error.into(),
        })
    }

    pub fn publish_stopped(&self, task_id: TaskId) -> usize {
        self.publish(ProgressEvent::Stopped {
            task_id,
            status: TaskStatus::Stopped,
        })
    }

    pub fn publish_paused(&self, task_id: TaskId, progress: TaskProgress) -> usize {
        self.publish(ProgressEvent::Paused {
            task_id,
            status: TaskStatus::Paused,
            total: progress.total,
            completed: progress.completed,
            failed: progress.failed,
        })
    }

    /// Drops the task's sender; its subscribers then see the end of the stream.
    pub fn close(&self, task_id: TaskId) {
        self.senders.remove(&task_id);
    }

    /// Number of tasks that currently hold a sender.
    pub fn open_channels(&self) -> usize {
        self.senders.len()
    }

    pub fn subscriber_count(&self, task_id: TaskId) -> usize {
        self.senders
            .get(&task_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

pub struct ProgressSubscription {
    task_id: TaskId,
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl ProgressSubscription {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Next event, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(task_id = %self.task_id, missed, "progress subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(task_id = %self.task_id, missed, "progress subscriber lagged");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

pub struct ListenerHandle {
    task_id: TaskId,
    handle: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn unsubscribe(self) {
        self.handle.abort();
    }

    /// Waits until the listener has seen the end of the stream.
    pub async fn finished(self) {
        let _ = self.handle.await;
    }
}
