//! Pipeline server: durable queues, monitoring, and the HTTP surface in
//! one process.

use std::sync::Arc;

use anyhow::Context;

use placeflow::config::PipelineConfig;
use placeflow::events::EventPublisher;
use placeflow::import::enrichment::HttpPlaceLookup;
use placeflow::import::pipeline::ImportPipeline;
use placeflow::import::repository::InMemoryRecordRepository;
use placeflow::logging::init_structured_logging;
use placeflow::monitoring::error_classifier::ErrorClassifier;
use placeflow::monitoring::metrics::MetricsCollector;
use placeflow::queue::orchestrator::JobQueueOrchestrator;
use placeflow::queue::store::JobStore;
use placeflow::web::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_structured_logging();
    let config = PipelineConfig::from_env();

    let store = Arc::new(
        JobStore::open(&config.database.url, config.database.max_connections)
            .await
            .with_context(|| format!("opening job store at {}", config.database.url))?,
    );

    let events = EventPublisher::default();
    let classifier = ErrorClassifier::new(config.monitoring.clone());
    let metrics = MetricsCollector::new(config.monitoring.clone(), store.clone());
    let _classifier_task = classifier.attach(&events);
    let _metrics_feed = metrics.attach(&events);
    let _metrics_loop = metrics.start();

    let orchestrator = JobQueueOrchestrator::new(store, config.queue.clone(), events);

    let lookup = Arc::new(
        HttpPlaceLookup::new(&config.enrichment)
            .context("place lookup client (is PLACES_API_KEY set?)")?,
    );
    let repository = Arc::new(InMemoryRecordRepository::new());
    let pipeline = ImportPipeline::new(
        config.clone(),
        orchestrator.clone(),
        lookup,
        repository,
    );

    orchestrator.start();

    let state = AppState::new(pipeline.clone(), classifier, metrics);
    let listener = tokio::net::TcpListener::bind(&config.web.bind_address)
        .await
        .with_context(|| format!("binding {}", config.web.bind_address))?;
    tracing::info!(address = %config.web.bind_address, "pipeline server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    tracing::info!("shutdown signal received, draining queues");
    pipeline.flush_pending().await;
    orchestrator.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
