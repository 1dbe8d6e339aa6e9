//! Typed, process-wide notification bus for cross-cutting domain events.
//!
//! The host constructs one [`EventBus`] at startup and hands clones of it to
//! whatever needs to publish or listen. Dropping the last clone tears the bus
//! down: every receiver then observes the end of the stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::{PromptId, PromptVersionId, TaskId, TaskStatus};
use crate::error::Result;
use crate::traits::EventPublisher;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    PromptSaved {
        prompt_id: PromptId,
        version_id: PromptVersionId,
    },
    TaskCreated {
        task_id: TaskId,
        total: usize,
    },
    TaskFinished {
        task_id: TaskId,
        status: TaskStatus,
    },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }

    /// Sends to the current subscribers and returns how many received it.
    /// Having nobody listening is not an error.
    pub fn emit(&self, event: DomainEvent) -> usize {
        tracing::trace!(?event, "emitting domain event");
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EventPublisher<DomainEvent> for EventBus {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.emit(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_current_subscribers_only() {
        let bus = EventBus::new(8);
        assert_eq!(bus.emit(DomainEvent::TaskCreated { task_id: TaskId::new(), total: 1 }), 0);

        let mut rx = bus.subscribe();
        let task_id = TaskId::new();
        bus.publish(DomainEvent::TaskFinished { task_id, status: TaskStatus::Completed })
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            DomainEvent::TaskFinished { task_id, status: TaskStatus::Completed }
        );
    }

    #[tokio::test]
    async fn test_dropping_bus_closes_receivers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        drop(bus);
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
    }
}
