//! Shared state for the web handlers.

use std::sync::Arc;

use crate::import::pipeline::ImportPipeline;
use crate::monitoring::error_classifier::ErrorClassifier;
use crate::monitoring::metrics::MetricsCollector;
use crate::queue::orchestrator::JobQueueOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ImportPipeline>,
    pub orchestrator: Arc<JobQueueOrchestrator>,
    pub classifier: Arc<ErrorClassifier>,
    pub metrics: Arc<MetricsCollector>,
}

impl AppState {
    pub fn new(
        pipeline: Arc<ImportPipeline>,
        classifier: Arc<ErrorClassifier>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        let orchestrator = pipeline.orchestrator().clone();
        Self {
            pipeline,
            orchestrator,
            classifier,
            metrics,
        }
    }
}
