//! # Pipeline Configuration
//!
//! Sectioned configuration for every component of the pipeline: the durable
//! job store, per-queue worker behavior, batching, the enrichment
//! collaborator, validation bounds, the import surface, monitoring, and the
//! web listener.
//!
//! Every section carries sensible defaults so a `PipelineConfig::default()`
//! is fully runnable against an on-disk SQLite store. Deployment overrides
//! come from the environment (`DATABASE_URL`, `PLACES_API_KEY`,
//! `PLACEFLOW_BIND`) rather than silent hardcoded fallbacks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::queue::job::QueueName;

/// Root configuration for the whole pipeline process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Durable job store connection settings
    pub database: DatabaseConfig,

    /// Queue orchestration and retry settings
    pub queue: QueueConfig,

    /// Batch accumulation settings
    pub batch: BatchConfig,

    /// Enrichment collaborator settings
    pub enrichment: EnrichmentConfig,

    /// Geographic validation bounds
    pub validation: ValidationConfig,

    /// Import entrypoint limits
    pub import: ImportConfig,

    /// Error classification and metrics settings
    pub monitoring: MonitoringConfig,

    /// HTTP listener settings
    pub web: WebConfig,
}

impl PipelineConfig {
    /// Load the default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }
        if let Ok(key) = std::env::var("PLACES_API_KEY") {
            config.enrichment.api_key = Some(key);
        }
        if let Ok(bind) = std::env::var("PLACEFLOW_BIND") {
            config.web.bind_address = bind;
        }
        config
    }
}

/// Connection settings for the durable queue store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL for the job store
    pub url: String,

    /// Maximum pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://placeflow.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Worker and retry behavior shared by all queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Concurrent workers per queue, unless overridden below
    pub concurrency: usize,

    /// Per-queue worker counts; queues not listed use `concurrency`
    #[serde(default)]
    pub concurrency_overrides: HashMap<QueueName, usize>,

    /// Default attempt ceiling for a job
    pub max_attempts: u32,

    /// Base delay for exponential retry backoff
    pub initial_backoff_ms: u64,

    /// Idle poll interval for worker loops
    pub poll_interval_ms: u64,

    /// Remove completed jobs instead of retaining them
    pub remove_on_complete: bool,

    /// Grace period for in-flight jobs during shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            concurrency_overrides: HashMap::new(),
            max_attempts: 3,
            initial_backoff_ms: 1000,
            poll_interval_ms: 250,
            remove_on_complete: false,
            shutdown_timeout_ms: 10_000,
        }
    }
}

impl QueueConfig {
    /// Worker count for one queue, clamped to at least one worker.
    pub fn concurrency_for(&self, queue: QueueName) -> usize {
        self.concurrency_overrides
            .get(&queue)
            .copied()
            .unwrap_or(self.concurrency)
            .max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Batch accumulation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Items that trigger an immediate flush
    pub batch_size: usize,

    /// Flush deadline for partial batches
    pub batch_timeout_ms: u64,

    /// Items processed concurrently within a flush chunk
    pub max_concurrent: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            batch_timeout_ms: 1000,
            max_concurrent: 5,
        }
    }
}

impl BatchConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

/// Settings for the external place-lookup collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// API key for the lookup service; absent in tests and offline setups
    pub api_key: Option<String>,

    /// Base URL of the lookup service
    pub base_url: String,

    /// Concurrent in-flight lookup calls allowed
    pub max_parallel_requests: usize,

    /// Photo references retained per place
    pub max_photos_per_place: usize,

    /// Per-request timeout for the HTTP client
    pub request_timeout_ms: u64,

    /// Transport-level retry attempts inside the collaborator
    pub max_attempts: u32,

    /// Base delay for transport retry backoff
    pub retry_base_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://maps.googleapis.com/maps/api/place".to_string(),
            max_parallel_requests: 4,
            max_photos_per_place: 3,
            request_timeout_ms: 10_000,
            max_attempts: 3,
            retry_base_ms: 250,
        }
    }
}

/// Geographic bounds for the validation stage.
///
/// Records outside the global latitude/longitude ranges are rejected first;
/// the target-region bounds below then reject records that are valid
/// coordinates but outside the service area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        // Korean peninsula service area
        Self {
            min_latitude: 33.0,
            max_latitude: 43.0,
            min_longitude: 124.0,
            max_longitude: 132.0,
        }
    }
}

/// Import entrypoint limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Maximum accepted file size in bytes
    pub max_file_size_bytes: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Error classification and metrics collection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Metrics snapshot interval
    pub collect_interval_ms: u64,

    /// Snapshot retention window
    pub retention_period_ms: u64,

    /// Windowed error rate (0.0 - 1.0) that raises the alert signal
    pub alert_threshold: f64,

    /// Rolling window for the alert error rate
    pub alert_window_ms: u64,

    /// Bounded size of the recent-errors ring buffer
    pub recent_errors_capacity: usize,

    /// Retention for trend history (drives daily/weekly/monthly counts)
    pub history_retention_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            collect_interval_ms: 10_000,
            retention_period_ms: 3_600_000,
            alert_threshold: 0.5,
            alert_window_ms: 60_000,
            recent_errors_capacity: 100,
            history_retention_ms: 30 * 24 * 3_600_000,
        }
    }
}

impl MonitoringConfig {
    pub fn collect_interval(&self) -> Duration {
        Duration::from_millis(self.collect_interval_ms)
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_millis(self.retention_period_ms)
    }

    pub fn alert_window(&self) -> Duration {
        Duration::from_millis(self.alert_window_ms)
    }

    pub fn history_retention(&self) -> Duration {
        Duration::from_millis(self.history_retention_ms)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    pub bind_address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_runnable() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.queue.initial_backoff_ms, 1000);
        assert!(config.batch.batch_size > 0);
        assert!(config.validation.min_latitude < config.validation.max_latitude);
    }

    #[test]
    fn per_queue_concurrency_falls_back_to_the_shared_knob() {
        let mut config = QueueConfig::default();
        config.concurrency_overrides.insert(QueueName::Enrichment, 1);
        config.concurrency_overrides.insert(QueueName::Image, 0);

        assert_eq!(config.concurrency_for(QueueName::Enrichment), 1);
        // Zero is clamped; a queue always has at least one worker.
        assert_eq!(config.concurrency_for(QueueName::Image), 1);
        assert_eq!(config.concurrency_for(QueueName::Import), config.concurrency);
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("PLACEFLOW_BIND", "127.0.0.1:9999");
        let config = PipelineConfig::from_env();
        assert_eq!(config.web.bind_address, "127.0.0.1:9999");
        std::env::remove_var("PLACEFLOW_BIND");
    }
}
