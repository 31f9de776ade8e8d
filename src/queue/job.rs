//! # Queue Job Model
//!
//! The durable job shape shared by the store, the orchestrator, and the
//! management API, plus the closed set of queue names known at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// The closed set of logical queues. Queue names are known at startup;
/// there is no dynamic queue creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    /// Raw record intake: validation and dispatch
    Import,
    /// Place resolution against the lookup collaborator
    Enrichment,
    /// Photo reference resolution
    Image,
    /// Content publication, driven by an external collaborator
    Content,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        QueueName::Import,
        QueueName::Enrichment,
        QueueName::Image,
        QueueName::Content,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Import => "import",
            QueueName::Enrichment => "enrichment",
            QueueName::Image => "image",
            QueueName::Content => "content",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "import" => Some(QueueName::Import),
            "enrichment" => Some(QueueName::Enrichment),
            "image" => Some(QueueName::Image),
            "content" => Some(QueueName::Content),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle state. Transitions are owned solely by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Ready for a worker to claim
    Waiting,
    /// Claimed and executing
    Active,
    /// Handler succeeded
    Completed,
    /// Attempts exhausted; retained for operator inspection
    Failed,
    /// Scheduled for a later attempt (enqueue delay or retry backoff)
    Delayed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Delayed => "delayed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "waiting" => Some(JobState::Waiting),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "delayed" => Some(JobState::Delayed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: Uuid,
    pub queue_name: QueueName,
    pub data: serde_json::Value,
    pub state: JobState,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time a worker may claim this job
    pub run_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
}

/// Per-state job counts for one queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl JobCounts {
    /// Sum across all states currently present in the store.
    pub fn total(&self) -> u64 {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}

/// Monotonic lifetime totals for one queue, independent of cleanup.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueTotals {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Options for a single enqueue operation.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Override the configured attempt ceiling
    pub max_attempts: Option<u32>,
    /// Delay before the job becomes claimable
    pub delay: Option<Duration>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_round_trips() {
        for queue in QueueName::ALL {
            assert_eq!(QueueName::parse(queue.as_str()), Some(queue));
        }
        assert_eq!(QueueName::parse("bogus"), None);
    }

    #[test]
    fn job_state_round_trips() {
        for state in [
            JobState::Waiting,
            JobState::Active,
            JobState::Completed,
            JobState::Failed,
            JobState::Delayed,
        ] {
            assert_eq!(JobState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn counts_total_sums_all_states() {
        let counts = JobCounts {
            waiting: 1,
            active: 2,
            completed: 3,
            failed: 4,
            delayed: 5,
        };
        assert_eq!(counts.total(), 15);
    }

    #[test]
    fn enqueue_options_builder() {
        let options = EnqueueOptions::new()
            .with_max_attempts(5)
            .with_delay(Duration::from_secs(2));
        assert_eq!(options.max_attempts, Some(5));
        assert_eq!(options.delay, Some(Duration::from_secs(2)));
    }
}
