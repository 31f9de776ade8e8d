//! Durable job queue: job model, SQLite-backed store, orchestrator, and
//! the batch accumulator that feeds it.

pub mod batch;
pub mod job;
pub mod orchestrator;
pub mod store;

pub use batch::{BatchAccumulator, BatchItem, BatchProcessor};
pub use job::{EnqueueOptions, JobCounts, JobState, QueueJob, QueueName, QueueTotals};
pub use orchestrator::{backoff_delay, JobHandler, JobQueueOrchestrator, QueueStatus};
pub use store::{JobStore, StoreHealth};
