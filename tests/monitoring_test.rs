//! Monitoring observers wired to a live orchestrator: classification of
//! real failure events and metrics snapshots over the durable store.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use placeflow::config::{MonitoringConfig, QueueConfig};
use placeflow::error::{PipelineError, Result};
use placeflow::events::EventPublisher;
use placeflow::monitoring::error_classifier::ErrorClassifier;
use placeflow::monitoring::metrics::MetricsCollector;
use placeflow::queue::job::{EnqueueOptions, QueueJob, QueueName};
use placeflow::queue::orchestrator::{JobHandler, JobQueueOrchestrator};
use placeflow::queue::store::JobStore;

struct RateLimitedHandler;

#[async_trait]
impl JobHandler for RateLimitedHandler {
    async fn handle(&self, _job: &QueueJob) -> Result<()> {
        Err(PipelineError::RateLimited("quota exhausted".to_string()))
    }
}

struct OkHandler;

#[async_trait]
impl JobHandler for OkHandler {
    async fn handle(&self, _job: &QueueJob) -> Result<()> {
        Ok(())
    }
}

fn fast_config() -> QueueConfig {
    QueueConfig {
        concurrency: 1,
        max_attempts: 2,
        initial_backoff_ms: 10,
        poll_interval_ms: 10,
        remove_on_complete: false,
        shutdown_timeout_ms: 1_000,
        ..QueueConfig::default()
    }
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..250 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within 5s");
}

#[tokio::test]
async fn classifier_sees_orchestrator_failures() {
    let store = Arc::new(JobStore::open_in_memory().await.unwrap());
    let events = EventPublisher::default();
    let classifier = ErrorClassifier::new(MonitoringConfig::default());
    classifier.attach(&events);

    let orchestrator = JobQueueOrchestrator::new(store, fast_config(), events);
    orchestrator.register_handler(QueueName::Enrichment, Arc::new(RateLimitedHandler));
    orchestrator.start();

    orchestrator
        .enqueue(QueueName::Enrichment, serde_json::json!({}), EnqueueOptions::new())
        .await
        .unwrap();

    // Two attempts, both failing: one retry event plus one terminal event.
    wait_for(|| async { classifier.error_stats().total_errors == 2 }).await;

    let stats = classifier.error_stats();
    assert_eq!(stats.errors_by_kind.get("rate_limit"), Some(&2));
    assert_eq!(stats.errors_by_queue.get("enrichment"), Some(&2));
    assert!(stats.alert_active, "all outcomes in the window failed");
    assert!(stats.recent_errors.iter().any(|e| e.terminal));

    orchestrator.close().await;
}

#[tokio::test]
async fn metrics_reflect_completions_across_the_pipeline() {
    let store = Arc::new(JobStore::open_in_memory().await.unwrap());
    let events = EventPublisher::default();
    let metrics = MetricsCollector::new(MonitoringConfig::default(), store.clone());
    metrics.attach(&events);

    let orchestrator = JobQueueOrchestrator::new(store, fast_config(), events);
    orchestrator.register_handler(QueueName::Import, Arc::new(OkHandler));
    orchestrator.start();

    for _ in 0..3 {
        orchestrator
            .enqueue(QueueName::Import, serde_json::json!({}), EnqueueOptions::new())
            .await
            .unwrap();
    }
    wait_for(|| async {
        orchestrator
            .get_job_counts(QueueName::Import)
            .await
            .unwrap()
            .completed
            == 3
    })
    .await;
    // Let the collector drain the event stream before snapshotting.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshots = metrics.collect().await.unwrap();
    let import = snapshots
        .iter()
        .find(|s| s.queue_name == QueueName::Import)
        .unwrap();
    assert_eq!(import.processed, 3);
    assert_eq!(import.failed, 0);
    assert!(import.throughput > 0.0);
    assert_eq!(import.error_rate, 0.0);

    // History is queryable per queue.
    assert_eq!(metrics.metrics(Some(QueueName::Import)).len(), 1);

    orchestrator.close().await;
}
