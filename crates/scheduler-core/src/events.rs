//! Fire-and-forget outbound notifications over a single broadcast channel.
//! There is no per-subscriber topic routing; every subscriber sees every
//! event and filters client-side.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::{ExecutionStatus, JobId};

/// Every notification the scheduler can emit, tagged by `kind` for clients
/// that deserialize this over the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    JobCreated { job_id: JobId, job_name: String, timestamp: DateTime<Utc> },
    JobUpdated { job_id: JobId, job_name: String, timestamp: DateTime<Utc> },
    JobDeleted { job_id: JobId, job_name: String, timestamp: DateTime<Utc> },
    ExecutionStarted { job_id: JobId, job_name: String, timestamp: DateTime<Utc> },
    ExecutionCompleted {
        job_id: JobId,
        job_name: String,
        status: ExecutionStatus,
        error_message: Option<String>,
        timestamp: DateTime<Utc>,
    },
    ScheduleChanged {
        job_id: JobId,
        job_name: String,
        old_expression: String,
        new_expression: String,
        timestamp: DateTime<Utc>,
    },
}

/// Fire-and-forget publishing. Implementations must never let a publish
/// failure propagate back into the caller's persistence path.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: Event);
}

/// In-process pub/sub over a `tokio::sync::broadcast` channel. Consumers
/// (e.g. the real-time push channel this core treats as an external
/// collaborator) subscribe with `subscribe()`.
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for BroadcastEventPublisher {
    async fn publish(&self, event: Event) {
        // No subscribers is the common case at boot; swallow and log rather than error.
        if let Err(e) = self.sender.send(event) {
            debug!(error = %e, "no event subscribers, dropping event");
        }
    }
}

/// No-op publisher for tests/CLI paths that don't care about notifications.
pub struct NullEventPublisher;

#[async_trait]
impl EventPublisher for NullEventPublisher {
    async fn publish(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn delivers_to_subscribers() {
        let publisher = BroadcastEventPublisher::new(16);
        let mut rx = publisher.subscribe();

        publisher
            .publish(Event::JobCreated { job_id: Uuid::new_v4(), job_name: "ping".to_string(), timestamp: Utc::now() })
            .await;

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, Event::JobCreated { .. }));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let publisher = BroadcastEventPublisher::new(16);
        publisher
            .publish(Event::JobDeleted { job_id: Uuid::new_v4(), job_name: "ping".to_string(), timestamp: Utc::now() })
            .await;
    }
}
