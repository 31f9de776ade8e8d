//! # Queue Metrics Collection
//!
//! Periodic per-queue snapshots combining durable store counts with
//! event-derived interval rates (throughput, latency, error rate). History
//! is bounded by the configured retention window.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::MonitoringConfig;
use crate::error::Result;
use crate::events::{EventPublisher, JobEventKind};
use crate::queue::job::QueueName;
use crate::queue::store::JobStore;

/// One point-in-time view of a queue.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub queue_name: QueueName,
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    /// Lifetime completions, monotonic
    pub processed: u64,
    /// Lifetime terminal failures, monotonic
    pub failed: u64,
    /// Completions per second over the last collection interval
    pub throughput: f64,
    /// Mean handler duration over the last collection interval
    pub avg_latency_ms: f64,
    /// Failure fraction of outcomes over the last collection interval
    pub error_rate: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default, Clone, Copy)]
struct IntervalStats {
    completions: u64,
    total_duration_ms: u64,
    failures: u64,
}

#[derive(Default)]
struct CollectorState {
    history: VecDeque<MetricsSnapshot>,
    interval: HashMap<QueueName, IntervalStats>,
    last_collected_at: Option<DateTime<Utc>>,
}

pub struct MetricsCollector {
    config: MonitoringConfig,
    store: Arc<JobStore>,
    state: Mutex<CollectorState>,
}

impl MetricsCollector {
    pub fn new(config: MonitoringConfig, store: Arc<JobStore>) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            state: Mutex::new(CollectorState::default()),
        })
    }

    /// Fold job outcomes from the event stream into interval stats.
    pub fn attach(self: &Arc<Self>, events: &EventPublisher) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        let mut receiver = events.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        let mut state = collector.state.lock();
                        let interval = state.interval.entry(event.queue_name).or_default();
                        match event.kind {
                            JobEventKind::Completed { duration_ms } => {
                                interval.completions += 1;
                                interval.total_duration_ms += duration_ms;
                            }
                            JobEventKind::Failed { terminal: true, .. } => {
                                interval.failures += 1;
                            }
                            _ => {}
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "metrics collector lagged behind event stream");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Collect on the configured interval until the store closes.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let collector = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(collector.config.collect_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if collector.store.is_closed() {
                    break;
                }
                if let Err(err) = collector.collect().await {
                    tracing::error!(error = %err, "metrics collection failed");
                }
            }
        })
    }

    /// Take one snapshot per queue, reset interval stats, and evict history
    /// past the retention window.
    pub async fn collect(&self) -> Result<Vec<MetricsSnapshot>> {
        let now = Utc::now();

        // Store reads happen outside the lock; the interval reset below is
        // the only critical section.
        let mut counts = Vec::with_capacity(QueueName::ALL.len());
        for queue in QueueName::ALL {
            counts.push((
                queue,
                self.store.counts(queue).await?,
                self.store.totals(queue).await?,
            ));
        }

        let mut state = self.state.lock();
        let elapsed_secs = state
            .last_collected_at
            .map(|prev| ((now - prev).num_milliseconds().max(1) as f64) / 1000.0)
            .unwrap_or_else(|| self.config.collect_interval().as_secs_f64().max(0.001));
        state.last_collected_at = Some(now);

        let mut snapshots = Vec::with_capacity(counts.len());
        for (queue, counts, totals) in counts {
            let interval = state.interval.remove(&queue).unwrap_or_default();
            let outcomes = interval.completions + interval.failures;
            snapshots.push(MetricsSnapshot {
                queue_name: queue,
                waiting: counts.waiting,
                active: counts.active,
                delayed: counts.delayed,
                processed: totals.completed,
                failed: totals.failed,
                throughput: interval.completions as f64 / elapsed_secs,
                avg_latency_ms: if interval.completions > 0 {
                    interval.total_duration_ms as f64 / interval.completions as f64
                } else {
                    0.0
                },
                error_rate: if outcomes > 0 {
                    interval.failures as f64 / outcomes as f64
                } else {
                    0.0
                },
                timestamp: now,
            });
        }

        state.history.extend(snapshots.iter().cloned());
        let cutoff = now - ChronoDuration::milliseconds(self.config.retention_period_ms as i64);
        while state.history.front().is_some_and(|s| s.timestamp < cutoff) {
            state.history.pop_front();
        }

        Ok(snapshots)
    }

    /// Retained snapshots, optionally filtered to one queue.
    pub fn metrics(&self, queue: Option<QueueName>) -> Vec<MetricsSnapshot> {
        let state = self.state.lock();
        state
            .history
            .iter()
            .filter(|s| queue.is_none_or(|q| s.queue_name == q))
            .cloned()
            .collect()
    }
}
