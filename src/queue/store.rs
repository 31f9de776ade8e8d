//! # Durable Job Store
//!
//! SQLite-backed persistence for queue jobs via `sqlx`. The store is the
//! shared, process-wide resource behind every queue: jobs survive process
//! restarts, workers claim atomically, and per-queue lifetime totals are
//! tracked separately from current state so the count invariant stays
//! observable even after cleanup.
//!
//! All state transitions go through the orchestrator; nothing else mutates
//! queue state except through this API.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::queue::job::{JobCounts, JobState, QueueJob, QueueName, QueueTotals};

const JOB_COLUMNS: &str = "id, queue_name, data, state, attempts_made, max_attempts, \
     enqueued_at, run_at, started_at, finished_at, failed_reason";

/// Health snapshot of the backing store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    /// Database size in bytes (page_count * page_size)
    pub size_bytes: i64,
    /// Open pooled connections
    pub pool_connections: u32,
    /// Idle pooled connections
    pub idle_connections: u64,
    /// Store operations executed since open
    pub operations: u64,
    /// Seconds since the store was opened
    pub uptime_secs: u64,
}

/// The durable queue store. Created once per process and shared.
pub struct JobStore {
    pool: SqlitePool,
    operations: AtomicU64,
    opened_at: Instant,
}

impl JobStore {
    /// Open (and migrate) a store at the given SQLite URL.
    pub async fn open(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            operations: AtomicU64::new(0),
            opened_at: Instant::now(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory store. A single connection keeps the database
    /// shared across all uses of the pool.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            operations: AtomicU64::new(0),
            opened_at: Instant::now(),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                queue_name TEXT NOT NULL,
                data TEXT NOT NULL,
                state TEXT NOT NULL,
                attempts_made INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                enqueued_at INTEGER NOT NULL,
                run_at INTEGER NOT NULL,
                started_at INTEGER,
                finished_at INTEGER,
                failed_reason TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_claim
             ON jobs (queue_name, state, run_at, enqueued_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS queue_totals (
                queue_name TEXT PRIMARY KEY,
                enqueued INTEGER NOT NULL DEFAULT 0,
                completed INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn tick(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    /// Insert a freshly enqueued job and bump the queue's lifetime total.
    pub async fn insert(&self, job: &QueueJob) -> Result<()> {
        self.tick();
        sqlx::query(
            "INSERT INTO jobs (id, queue_name, data, state, attempts_made, max_attempts,
                               enqueued_at, run_at, started_at, finished_at, failed_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL)",
        )
        .bind(job.id.to_string())
        .bind(job.queue_name.as_str())
        .bind(serde_json::to_string(&job.data)?)
        .bind(job.state.as_str())
        .bind(job.attempts_made as i64)
        .bind(job.max_attempts as i64)
        .bind(job.enqueued_at.timestamp_millis())
        .bind(job.run_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO queue_totals (queue_name, enqueued) VALUES (?, 1)
             ON CONFLICT (queue_name) DO UPDATE SET enqueued = enqueued + 1",
        )
        .bind(job.queue_name.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomically claim the next due job on a queue, transitioning it to
    /// `active`. FIFO within the queue's due jobs (delayed jobs become due
    /// once their `run_at` passes).
    pub async fn claim_next(
        &self,
        queue: QueueName,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueJob>> {
        self.tick();
        let sql = format!(
            "UPDATE jobs SET state = 'active', started_at = ?
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE queue_name = ?
                   AND (state = 'waiting' OR state = 'delayed')
                   AND run_at <= ?
                 ORDER BY run_at ASC, enqueued_at ASC, id ASC
                 LIMIT 1
             )
             RETURNING {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(now.timestamp_millis())
            .bind(queue.as_str())
            .bind(now.timestamp_millis())
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_job).transpose()
    }

    /// Record a successful execution. The job is either retained as
    /// `completed` or removed per the cleanup policy; the lifetime total is
    /// bumped either way.
    pub async fn mark_completed(
        &self,
        queue: QueueName,
        id: Uuid,
        finished_at: DateTime<Utc>,
        remove: bool,
    ) -> Result<()> {
        self.tick();
        if remove {
            sqlx::query("DELETE FROM jobs WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE jobs SET state = 'completed', finished_at = ? WHERE id = ?")
                .bind(finished_at.timestamp_millis())
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        }

        sqlx::query(
            "INSERT INTO queue_totals (queue_name, completed) VALUES (?, 1)
             ON CONFLICT (queue_name) DO UPDATE SET completed = completed + 1",
        )
        .bind(queue.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Schedule a failed attempt for retry: back to `delayed` with the
    /// backoff deadline, incremented attempt count, claim marker cleared.
    pub async fn mark_retry(
        &self,
        id: Uuid,
        attempts_made: u32,
        run_at: DateTime<Utc>,
    ) -> Result<()> {
        self.tick();
        sqlx::query(
            "UPDATE jobs SET state = 'delayed', attempts_made = ?, run_at = ?, started_at = NULL
             WHERE id = ?",
        )
        .bind(attempts_made as i64)
        .bind(run_at.timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a terminal failure. Failed jobs are retained for operator
    /// inspection until explicitly deleted.
    pub async fn mark_failed(
        &self,
        queue: QueueName,
        id: Uuid,
        attempts_made: u32,
        reason: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<()> {
        self.tick();
        sqlx::query(
            "UPDATE jobs SET state = 'failed', attempts_made = ?, failed_reason = ?, finished_at = ?
             WHERE id = ?",
        )
        .bind(attempts_made as i64)
        .bind(reason)
        .bind(finished_at.timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO queue_totals (queue_name, failed) VALUES (?, 1)
             ON CONFLICT (queue_name) DO UPDATE SET failed = failed + 1",
        )
        .bind(queue.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Remove a job regardless of state. Returns whether a row was removed.
    pub async fn delete(&self, queue: QueueName, id: Uuid) -> Result<bool> {
        self.tick();
        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND queue_name = ?")
            .bind(id.to_string())
            .bind(queue.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Fetch a single job by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<QueueJob>> {
        self.tick();
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job).transpose()
    }

    /// Current per-state counts for one queue.
    pub async fn counts(&self, queue: QueueName) -> Result<JobCounts> {
        self.tick();
        let rows = sqlx::query("SELECT state, COUNT(*) AS n FROM jobs WHERE queue_name = ? GROUP BY state")
            .bind(queue.as_str())
            .fetch_all(&self.pool)
            .await?;

        let mut counts = JobCounts::default();
        for row in rows {
            let state: String = row.get("state");
            let n: i64 = row.get("n");
            match JobState::parse(&state) {
                Some(JobState::Waiting) => counts.waiting = n as u64,
                Some(JobState::Active) => counts.active = n as u64,
                Some(JobState::Completed) => counts.completed = n as u64,
                Some(JobState::Failed) => counts.failed = n as u64,
                Some(JobState::Delayed) => counts.delayed = n as u64,
                None => {
                    return Err(PipelineError::Infrastructure(format!(
                        "unknown job state in store: {state}"
                    )))
                }
            }
        }
        Ok(counts)
    }

    /// Monotonic lifetime totals for one queue.
    pub async fn totals(&self, queue: QueueName) -> Result<QueueTotals> {
        self.tick();
        let row = sqlx::query(
            "SELECT enqueued, completed, failed FROM queue_totals WHERE queue_name = ?",
        )
        .bind(queue.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => QueueTotals {
                enqueued: row.get::<i64, _>("enqueued") as u64,
                completed: row.get::<i64, _>("completed") as u64,
                failed: row.get::<i64, _>("failed") as u64,
            },
            None => QueueTotals::default(),
        })
    }

    /// Paginated job listing with optional queue and state filters.
    /// Returns the page and the total row count matching the filters.
    pub async fn list(
        &self,
        queue: Option<QueueName>,
        state: Option<JobState>,
        page: u64,
        limit: u64,
    ) -> Result<(Vec<QueueJob>, u64)> {
        self.tick();
        let page = page.max(1);
        let limit = limit.clamp(1, 500);

        let mut filters = String::new();
        if queue.is_some() {
            filters.push_str(" AND queue_name = ?");
        }
        if state.is_some() {
            filters.push_str(" AND state = ?");
        }

        let count_sql = format!("SELECT COUNT(*) FROM jobs WHERE 1=1{filters}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(queue) = queue {
            count_query = count_query.bind(queue.as_str());
        }
        if let Some(state) = state {
            count_query = count_query.bind(state.as_str());
        }
        let total = count_query.fetch_one(&self.pool).await? as u64;

        let list_sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE 1=1{filters}
             ORDER BY enqueued_at DESC, id DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query(&list_sql);
        if let Some(queue) = queue {
            list_query = list_query.bind(queue.as_str());
        }
        if let Some(state) = state {
            list_query = list_query.bind(state.as_str());
        }
        let rows = list_query
            .bind(limit as i64)
            .bind(((page - 1) * limit) as i64)
            .fetch_all(&self.pool)
            .await?;

        let jobs = rows.into_iter().map(row_to_job).collect::<Result<_>>()?;
        Ok((jobs, total))
    }

    /// Every job across all queues, for monitoring.
    pub async fn all_jobs(&self) -> Result<Vec<QueueJob>> {
        self.tick();
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY enqueued_at DESC, id DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_job).collect()
    }

    /// Backing-store health for the monitoring API.
    pub async fn health(&self) -> Result<StoreHealth> {
        let size_bytes = sqlx::query_scalar::<_, i64>(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreHealth {
            size_bytes,
            pool_connections: self.pool.size(),
            idle_connections: self.pool.num_idle() as u64,
            operations: self.operations.load(Ordering::Relaxed),
            uptime_secs: self.opened_at.elapsed().as_secs(),
        })
    }

    /// Release the underlying connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Whether the pool has been closed.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

fn row_to_job(row: SqliteRow) -> Result<QueueJob> {
    let id: String = row.get("id");
    let queue_name: String = row.get("queue_name");
    let data: String = row.get("data");
    let state: String = row.get("state");

    Ok(QueueJob {
        id: Uuid::parse_str(&id)
            .map_err(|e| PipelineError::Infrastructure(format!("corrupt job id: {e}")))?,
        queue_name: QueueName::parse(&queue_name).ok_or_else(|| {
            PipelineError::Infrastructure(format!("unknown queue in store: {queue_name}"))
        })?,
        data: serde_json::from_str(&data)
            .map_err(|e| PipelineError::Infrastructure(format!("corrupt job payload: {e}")))?,
        state: JobState::parse(&state).ok_or_else(|| {
            PipelineError::Infrastructure(format!("unknown job state in store: {state}"))
        })?,
        attempts_made: row.get::<i64, _>("attempts_made") as u32,
        max_attempts: row.get::<i64, _>("max_attempts") as u32,
        enqueued_at: millis_to_datetime(row.get("enqueued_at"))?,
        run_at: millis_to_datetime(row.get("run_at"))?,
        started_at: row
            .get::<Option<i64>, _>("started_at")
            .map(millis_to_datetime)
            .transpose()?,
        finished_at: row
            .get::<Option<i64>, _>("finished_at")
            .map(millis_to_datetime)
            .transpose()?,
        failed_reason: row.get("failed_reason"),
    })
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| PipelineError::Infrastructure(format!("corrupt timestamp: {millis}")))
}
