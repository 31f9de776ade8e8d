//! # Job Queue Orchestrator
//!
//! Named durable queues over the shared [`JobStore`]: per-queue handler
//! registration, bounded worker loops, retry with exponential backoff via
//! the `Delayed` state, pause/resume, and graceful shutdown with an
//! in-flight grace period.
//!
//! The orchestrator owns every job state transition. Handlers only see the
//! job payload and signal success or failure through their `Result`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{PipelineError, Result};
use crate::events::{EventPublisher, JobEvent, JobEventKind};
use crate::queue::job::{EnqueueOptions, JobCounts, JobState, QueueJob, QueueName, QueueTotals};
use crate::queue::store::JobStore;

/// Executes jobs claimed from one queue.
///
/// Returning `Err` signals a failed attempt; the orchestrator decides
/// between retry and terminal failure. Handlers must treat per-item
/// problems they can absorb (e.g. a record that fails validation) as
/// success at the job level.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueueJob) -> Result<()>;
}

/// Status summary for one queue, as exposed by the management API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QueueStatus {
    pub queue_name: QueueName,
    pub counts: JobCounts,
    pub totals: QueueTotals,
    pub paused: bool,
    pub handler_registered: bool,
}

/// Exponential backoff delay after the given (post-increment) attempt count.
pub fn backoff_delay(initial_backoff_ms: u64, attempts_made: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempts_made);
    Duration::from_millis(initial_backoff_ms.saturating_mul(factor))
}

pub struct JobQueueOrchestrator {
    store: Arc<JobStore>,
    config: QueueConfig,
    events: EventPublisher,
    handlers: DashMap<QueueName, Arc<dyn JobHandler>>,
    paused: DashMap<QueueName, bool>,
    shutting_down: AtomicBool,
    in_flight: AtomicUsize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl JobQueueOrchestrator {
    pub fn new(store: Arc<JobStore>, config: QueueConfig, events: EventPublisher) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            events,
            handlers: DashMap::new(),
            paused: DashMap::new(),
            shutting_down: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Register the handler for a queue. Queues without a handler accept
    /// jobs but never execute them; an external consumer drains those.
    pub fn register_handler(&self, queue: QueueName, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(queue, handler);
    }

    /// Durably enqueue a job. Returns the job handle immediately; execution
    /// happens asynchronously on the queue's workers.
    pub async fn enqueue(
        &self,
        queue: QueueName,
        data: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<QueueJob> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PipelineError::Infrastructure(
                "queue is shutting down; enqueue rejected".to_string(),
            ));
        }

        let now = Utc::now();
        let delay = options.delay.unwrap_or(Duration::ZERO);
        let job = QueueJob {
            id: Uuid::new_v4(),
            queue_name: queue,
            data,
            state: if delay.is_zero() {
                JobState::Waiting
            } else {
                JobState::Delayed
            },
            attempts_made: 0,
            max_attempts: options.max_attempts.unwrap_or(self.config.max_attempts),
            enqueued_at: now,
            run_at: now
                + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64),
            started_at: None,
            finished_at: None,
            failed_reason: None,
        };

        self.store.insert(&job).await?;
        self.events
            .publish(JobEvent::new(queue, job.id, JobEventKind::Enqueued));
        tracing::debug!(queue = %queue, job_id = %job.id, "job enqueued");
        Ok(job)
    }

    /// Spawn the worker loops for every queue with a registered handler.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock();
        for entry in self.handlers.iter() {
            let queue = *entry.key();
            let concurrency = self.config.concurrency_for(queue);
            for _ in 0..concurrency {
                let orchestrator = Arc::clone(self);
                workers.push(tokio::spawn(async move {
                    orchestrator.worker_loop(queue).await;
                }));
            }
            tracing::info!(queue = %queue, workers = concurrency, "queue workers started");
        }
    }

    async fn worker_loop(self: Arc<Self>, queue: QueueName) {
        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            if self.is_paused(queue) {
                tokio::time::sleep(self.config.poll_interval()).await;
                continue;
            }

            let claimed = match self.store.claim_next(queue, Utc::now()).await {
                Ok(claimed) => claimed,
                Err(err) => {
                    if self.store.is_closed() {
                        break;
                    }
                    tracing::error!(queue = %queue, error = %err, "claim failed");
                    tokio::time::sleep(self.config.poll_interval()).await;
                    continue;
                }
            };

            match claimed {
                Some(job) => {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    self.execute(job).await;
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                None => tokio::time::sleep(self.config.poll_interval()).await,
            }
        }
    }

    async fn execute(&self, job: QueueJob) {
        let handler = match self.handlers.get(&job.queue_name) {
            Some(handler) => Arc::clone(handler.value()),
            // Claimed on a queue whose handler was never registered;
            // workers only run for registered queues, so this is a bug.
            None => {
                tracing::error!(queue = %job.queue_name, job_id = %job.id, "no handler for claimed job");
                return;
            }
        };

        let started = Instant::now();
        let outcome = handler.handle(&job).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                if let Err(err) = self
                    .store
                    .mark_completed(job.queue_name, job.id, Utc::now(), self.config.remove_on_complete)
                    .await
                {
                    tracing::error!(job_id = %job.id, error = %err, "failed to record completion");
                    return;
                }
                self.events.publish(JobEvent::new(
                    job.queue_name,
                    job.id,
                    JobEventKind::Completed { duration_ms },
                ));
                tracing::debug!(queue = %job.queue_name, job_id = %job.id, duration_ms, "job completed");
            }
            Err(err) => self.handle_failure(&job, err, duration_ms).await,
        }
    }

    async fn handle_failure(&self, job: &QueueJob, err: PipelineError, duration_ms: u64) {
        let attempts_made = job.attempts_made + 1;
        let error = err.to_string();

        if attempts_made < job.max_attempts {
            let delay = backoff_delay(self.config.initial_backoff_ms, attempts_made);
            let run_at = Utc::now()
                + chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64);
            if let Err(store_err) = self.store.mark_retry(job.id, attempts_made, run_at).await {
                tracing::error!(job_id = %job.id, error = %store_err, "failed to schedule retry");
                return;
            }
            self.events.publish(JobEvent::new(
                job.queue_name,
                job.id,
                JobEventKind::Failed {
                    attempts_made,
                    error: error.clone(),
                    terminal: false,
                    retry_delay_ms: Some(delay.as_millis() as u64),
                },
            ));
            tracing::warn!(
                queue = %job.queue_name,
                job_id = %job.id,
                attempts_made,
                retry_delay_ms = delay.as_millis() as u64,
                error = %error,
                "job attempt failed, retry scheduled"
            );
        } else {
            if let Err(store_err) = self
                .store
                .mark_failed(job.queue_name, job.id, attempts_made, &error, Utc::now())
                .await
            {
                tracing::error!(job_id = %job.id, error = %store_err, "failed to record terminal failure");
                return;
            }
            self.events.publish(JobEvent::new(
                job.queue_name,
                job.id,
                JobEventKind::Failed {
                    attempts_made,
                    error: error.clone(),
                    terminal: true,
                    retry_delay_ms: None,
                },
            ));
            tracing::error!(
                queue = %job.queue_name,
                job_id = %job.id,
                attempts_made,
                duration_ms,
                error = %error,
                "job failed terminally"
            );
        }
    }

    pub fn pause(&self, queue: QueueName) {
        self.paused.insert(queue, true);
        tracing::info!(queue = %queue, "queue paused");
    }

    pub fn resume(&self, queue: QueueName) {
        self.paused.insert(queue, false);
        tracing::info!(queue = %queue, "queue resumed");
    }

    pub fn is_paused(&self, queue: QueueName) -> bool {
        self.paused.get(&queue).is_some_and(|p| *p.value())
    }

    pub async fn get_job_counts(&self, queue: QueueName) -> Result<JobCounts> {
        self.store.counts(queue).await
    }

    /// Counts, lifetime totals, and control state for every known queue.
    pub async fn queue_status(&self) -> Result<Vec<QueueStatus>> {
        let mut statuses = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            statuses.push(QueueStatus {
                queue_name: queue,
                counts: self.store.counts(queue).await?,
                totals: self.store.totals(queue).await?,
                paused: self.is_paused(queue),
                handler_registered: self.handlers.contains_key(&queue),
            });
        }
        Ok(statuses)
    }

    pub async fn get_all_jobs(&self) -> Result<Vec<QueueJob>> {
        self.store.all_jobs().await
    }

    pub async fn list_jobs(
        &self,
        queue: Option<QueueName>,
        state: Option<JobState>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<QueueJob>, u64)> {
        self.store.list(queue, state, page, limit).await
    }

    pub async fn get_job(&self, id: Uuid) -> Result<Option<QueueJob>> {
        self.store.get(id).await
    }

    pub async fn delete_job(&self, queue: QueueName, id: Uuid) -> Result<bool> {
        self.store.delete(queue, id).await
    }

    /// Graceful shutdown: stop claiming, wait out in-flight jobs up to the
    /// configured grace period, then abort leftover workers and close the
    /// store.
    pub async fn close(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.config.shutdown_timeout();
        while self.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        let leftover = self.in_flight.load(Ordering::SeqCst);
        if leftover > 0 {
            tracing::warn!(in_flight = leftover, "shutdown grace period expired");
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            worker.abort();
        }

        self.store.close().await;
        tracing::info!("queue orchestrator closed");
    }
}
