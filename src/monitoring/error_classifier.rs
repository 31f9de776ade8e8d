//! # Error Classification and Failure Analytics
//!
//! Passive subscriber to the job event stream. Classifies failure messages
//! into coarse categories, keeps bounded rolling state (recent errors, a
//! day/week/month trend history, and an alert window), and raises an alert
//! flag when the windowed error rate crosses the configured threshold.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::MonitoringConfig;
use crate::events::{EventPublisher, JobEvent, JobEventKind};
use crate::queue::job::QueueName;

/// Coarse failure category derived from the failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    ExternalService,
    RateLimit,
    Infrastructure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::ExternalService => "external_service",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

/// Classify a failure message. Rate limits are matched first since their
/// messages often also mention the upstream service.
pub fn classify(message: &str) -> ErrorKind {
    let message = message.to_lowercase();

    if message.contains("rate limit")
        || message.contains("429")
        || message.contains("quota")
        || message.contains("too many requests")
    {
        ErrorKind::RateLimit
    } else if message.contains("validation")
        || message.contains("invalid")
        || message.contains("unparsable")
        || message.contains("required")
    {
        ErrorKind::Validation
    } else if message.contains("infrastructure")
        || message.contains("database")
        || message.contains("sqlite")
        || message.contains("connection")
        || message.contains("io:")
        || message.contains("store")
    {
        ErrorKind::Infrastructure
    } else {
        ErrorKind::ExternalService
    }
}

/// One classified failure, retained in the recent-errors ring.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub job_id: Uuid,
    pub queue_name: QueueName,
    pub kind: ErrorKind,
    pub message: String,
    pub terminal: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Failure counts over trailing windows.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ErrorTrends {
    pub last_day: u64,
    pub last_week: u64,
    pub last_month: u64,
}

/// Aggregated view served by the monitoring API.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub total_errors: u64,
    /// Failure fraction of job outcomes inside the alert window
    pub error_rate: f64,
    pub errors_by_queue: HashMap<String, u64>,
    pub errors_by_kind: HashMap<String, u64>,
    pub recent_errors: Vec<ErrorRecord>,
    pub trends: ErrorTrends,
    pub alert_active: bool,
}

#[derive(Default)]
struct ClassifierState {
    total_errors: u64,
    by_queue: HashMap<QueueName, u64>,
    by_kind: HashMap<ErrorKind, u64>,
    recent: VecDeque<ErrorRecord>,
    /// Failure timestamps retained for trend windows
    history: VecDeque<DateTime<Utc>>,
    /// (timestamp, is_error) per job outcome inside the alert window
    window: VecDeque<(DateTime<Utc>, bool)>,
}

pub struct ErrorClassifier {
    config: MonitoringConfig,
    state: Mutex<ClassifierState>,
    alert_active: AtomicBool,
}

impl ErrorClassifier {
    pub fn new(config: MonitoringConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(ClassifierState::default()),
            alert_active: AtomicBool::new(false),
        })
    }

    /// Subscribe to the event stream and observe outcomes until the
    /// publisher is dropped.
    pub fn attach(self: &Arc<Self>, events: &EventPublisher) -> JoinHandle<()> {
        let classifier = Arc::clone(self);
        let mut receiver = events.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => classifier.observe(&event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "error classifier lagged behind event stream");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Fold one job event into the rolling state.
    pub fn observe(&self, event: &JobEvent) {
        let now = event.occurred_at;
        let mut state = self.state.lock();

        match &event.kind {
            JobEventKind::Enqueued => return,
            JobEventKind::Completed { .. } => {
                state.window.push_back((now, false));
            }
            JobEventKind::Failed {
                error, terminal, ..
            } => {
                let kind = classify(error);
                state.total_errors += 1;
                *state.by_queue.entry(event.queue_name).or_default() += 1;
                *state.by_kind.entry(kind).or_default() += 1;

                state.recent.push_back(ErrorRecord {
                    job_id: event.job_id,
                    queue_name: event.queue_name,
                    kind,
                    message: error.clone(),
                    terminal: *terminal,
                    occurred_at: now,
                });
                while state.recent.len() > self.config.recent_errors_capacity {
                    state.recent.pop_front();
                }

                state.history.push_back(now);
                state.window.push_back((now, true));
            }
        }

        self.prune(&mut state, now);
        self.recompute_alert(&state, now);
    }

    fn prune(&self, state: &mut ClassifierState, now: DateTime<Utc>) {
        let history_cutoff =
            now - ChronoDuration::milliseconds(self.config.history_retention_ms as i64);
        while state.history.front().is_some_and(|t| *t < history_cutoff) {
            state.history.pop_front();
        }

        let window_cutoff = now - ChronoDuration::milliseconds(self.config.alert_window_ms as i64);
        while state.window.front().is_some_and(|(t, _)| *t < window_cutoff) {
            state.window.pop_front();
        }
    }

    fn windowed_error_rate(state: &ClassifierState) -> f64 {
        if state.window.is_empty() {
            return 0.0;
        }
        let errors = state.window.iter().filter(|(_, is_error)| *is_error).count();
        errors as f64 / state.window.len() as f64
    }

    fn recompute_alert(&self, state: &ClassifierState, _now: DateTime<Utc>) {
        let rate = Self::windowed_error_rate(state);
        let active = !state.window.is_empty() && rate >= self.config.alert_threshold;
        self.alert_active.store(active, Ordering::SeqCst);
    }

    pub fn alert_active(&self) -> bool {
        self.alert_active.load(Ordering::SeqCst)
    }

    /// Current aggregated stats. The window is pruned and the alert flag
    /// recomputed against the current clock, so a quiet period clears a
    /// stale alert even with no new events arriving.
    pub fn error_stats(&self) -> ErrorStats {
        let now = Utc::now();
        let mut state = self.state.lock();
        self.prune(&mut state, now);
        self.recompute_alert(&state, now);

        let day_cutoff = now - ChronoDuration::days(1);
        let week_cutoff = now - ChronoDuration::weeks(1);
        let month_cutoff = now - ChronoDuration::days(30);
        let mut trends = ErrorTrends::default();
        for t in &state.history {
            if *t >= month_cutoff {
                trends.last_month += 1;
                if *t >= week_cutoff {
                    trends.last_week += 1;
                    if *t >= day_cutoff {
                        trends.last_day += 1;
                    }
                }
            }
        }

        ErrorStats {
            total_errors: state.total_errors,
            error_rate: Self::windowed_error_rate(&state),
            errors_by_queue: state
                .by_queue
                .iter()
                .map(|(q, n)| (q.as_str().to_string(), *n))
                .collect(),
            errors_by_kind: state
                .by_kind
                .iter()
                .map(|(k, n)| (k.as_str().to_string(), *n))
                .collect(),
            recent_errors: state.recent.iter().cloned().collect(),
            trends,
            alert_active: self.alert_active.load(Ordering::SeqCst),
        }
    }
}
