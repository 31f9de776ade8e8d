//! # Job Lifecycle Event Bus
//!
//! Broadcast-based publisher for job lifecycle events. The orchestrator and
//! the batch accumulator publish; the error classifier and the metrics
//! collector subscribe as passive observers. Publishing with no subscribers
//! is acceptable and never an error.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::queue::job::QueueName;

/// A lifecycle event for a single job.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub queue_name: QueueName,
    pub kind: JobEventKind,
    pub occurred_at: DateTime<Utc>,
}

/// What happened to the job.
#[derive(Debug, Clone)]
pub enum JobEventKind {
    /// The job was written to the durable store.
    Enqueued,

    /// The handler returned success.
    Completed {
        /// Handler execution time
        duration_ms: u64,
    },

    /// The handler returned an error.
    Failed {
        attempts_made: u32,
        error: String,
        /// True when attempts are exhausted and the job is retained as failed
        terminal: bool,
        /// Backoff delay before the next attempt, when one is scheduled
        retry_delay_ms: Option<u64>,
    },
}

impl JobEvent {
    pub fn new(queue_name: QueueName, job_id: Uuid, kind: JobEventKind) -> Self {
        Self {
            job_id,
            queue_name,
            kind,
            occurred_at: Utc::now(),
        }
    }
}

/// High-throughput publisher for job lifecycle events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<JobEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Events published with no active subscribers are
    /// dropped silently; observers are optional by design.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::default();
        publisher.publish(JobEvent::new(
            QueueName::Import,
            Uuid::new_v4(),
            JobEventKind::Enqueued,
        ));
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_events() {
        let publisher = EventPublisher::default();
        let mut rx = publisher.subscribe();

        let job_id = Uuid::new_v4();
        publisher.publish(JobEvent::new(
            QueueName::Enrichment,
            job_id,
            JobEventKind::Completed { duration_ms: 12 },
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, job_id);
        assert_eq!(event.queue_name, QueueName::Enrichment);
        assert!(matches!(
            event.kind,
            JobEventKind::Completed { duration_ms: 12 }
        ));
    }
}
