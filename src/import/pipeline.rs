//! # Import Pipeline
//!
//! Wires the stages to the queues. The canonical flow is parse → validate →
//! enrich → persist:
//!
//! - `import` parses the file and enqueues one `Import` job per record.
//! - The `Import` handler validates its record and feeds survivors into the
//!   batch accumulator, which dispatches them onto the `Enrichment` queue.
//! - The `Enrichment` handler resolves the record, persists the canonical
//!   result through the repository, and fans out one `Image` job per photo
//!   reference. A lookup failure propagates so the orchestrator retries.
//! - The `Image` handler resolves photo references to URLs on the stored
//!   record.
//!
//! The `Content` queue is managed here but executed by an external
//! consumer; no handler is registered for it.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::import::enrichment::{EnrichmentStage, PlaceLookup};
use crate::import::parser::RecordParser;
use crate::import::record::{PreviewRecord, RecordStatus, StageOutcome, StageStats};
use crate::import::repository::RecordRepository;
use crate::import::validation::ValidationStage;
use crate::queue::batch::{BatchAccumulator, BatchItem, BatchProcessor};
use crate::queue::job::{EnqueueOptions, QueueJob, QueueName};
use crate::queue::orchestrator::{JobHandler, JobQueueOrchestrator};

/// Payload carried by `Import` and `Enrichment` jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordJobPayload {
    pub record: PreviewRecord,
}

/// Payload carried by `Image` jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageJobPayload {
    pub place_id: String,
    pub photo_reference: String,
}

pub struct ImportPipeline {
    config: PipelineConfig,
    orchestrator: Arc<JobQueueOrchestrator>,
    validation: Arc<ValidationStage>,
    enrichment: Arc<EnrichmentStage>,
    repository: Arc<dyn RecordRepository>,
    batcher: BatchAccumulator<PreviewRecord>,
}

impl ImportPipeline {
    /// Build the pipeline and register its queue handlers on the
    /// orchestrator. Handlers hold the orchestrator weakly so shutdown can
    /// drop the whole graph.
    pub fn new(
        config: PipelineConfig,
        orchestrator: Arc<JobQueueOrchestrator>,
        lookup: Arc<dyn PlaceLookup>,
        repository: Arc<dyn RecordRepository>,
    ) -> Arc<Self> {
        let validation = Arc::new(ValidationStage::new(config.validation.clone()));
        let enrichment = Arc::new(EnrichmentStage::new(lookup.clone(), &config.enrichment));

        let dispatcher = Arc::new(EnrichmentDispatcher {
            orchestrator: Arc::downgrade(&orchestrator),
        });
        let batcher = BatchAccumulator::new(
            config.batch.clone(),
            QueueName::Enrichment,
            dispatcher,
            orchestrator.events().clone(),
        );

        orchestrator.register_handler(
            QueueName::Import,
            Arc::new(ImportJobHandler {
                validation: validation.clone(),
                batcher: batcher.clone(),
            }),
        );
        orchestrator.register_handler(
            QueueName::Enrichment,
            Arc::new(EnrichmentJobHandler {
                enrichment: enrichment.clone(),
                repository: repository.clone(),
                orchestrator: Arc::downgrade(&orchestrator),
            }),
        );
        orchestrator.register_handler(
            QueueName::Image,
            Arc::new(ImageJobHandler {
                lookup,
                repository: repository.clone(),
            }),
        );

        Arc::new(Self {
            config,
            orchestrator,
            validation,
            enrichment,
            repository,
            batcher,
        })
    }

    pub fn orchestrator(&self) -> &Arc<JobQueueOrchestrator> {
        &self.orchestrator
    }

    pub fn repository(&self) -> &Arc<dyn RecordRepository> {
        &self.repository
    }

    /// Accept a source file and enqueue one `Import` job per parsed record.
    ///
    /// Structural problems (size cap, missing headers, no records) fail the
    /// whole call; nothing is enqueued. A store failure mid-way surfaces as
    /// an infrastructure error.
    pub async fn import(&self, input: &str) -> Result<StageStats> {
        if input.len() > self.config.import.max_file_size_bytes {
            return Err(PipelineError::Structural(format!(
                "file exceeds the {} byte limit",
                self.config.import.max_file_size_bytes
            )));
        }

        let records = RecordParser::parse(input)?;
        if records.is_empty() {
            return Err(PipelineError::Structural(
                "file contains no records".to_string(),
            ));
        }

        let mut stats = StageStats::default();
        for record in records {
            let payload = serde_json::to_value(RecordJobPayload { record })?;
            self.orchestrator
                .enqueue(QueueName::Import, payload, EnqueueOptions::new())
                .await?;
            stats.record_success();
        }

        tracing::info!(records = stats.total, "import accepted");
        Ok(stats)
    }

    /// Synchronous validation preview: parse and validate without touching
    /// the queues.
    pub fn validate(&self, input: &str) -> Result<StageOutcome> {
        let records = RecordParser::parse(input)?;
        Ok(self.validation.validate(records))
    }

    /// Direct enrichment entrypoint. Records are always re-validated first;
    /// enriched results are persisted through the repository.
    pub async fn enrich(&self, records: Vec<PreviewRecord>) -> Result<StageOutcome> {
        let validated = self.validation.validate(records);
        let outcome = self.enrichment.enrich(validated.results).await;

        for record in &outcome.results {
            if record.status != RecordStatus::Enriched {
                continue;
            }
            if let Some(place) = record.enriched.as_ref().and_then(|e| e.place.as_ref()) {
                self.repository.create(place.clone()).await?;
            }
        }
        Ok(outcome)
    }

    /// Dispatch whatever the accumulator currently holds.
    pub async fn flush_pending(&self) {
        self.batcher.flush().await;
    }

    pub fn pending_batch_size(&self) -> usize {
        self.batcher.current_batch_size()
    }
}

/// Validates records and feeds survivors into the batch accumulator.
/// Invalid records are absorbed here: a record failing validation is an
/// expected outcome, not a failed job.
struct ImportJobHandler {
    validation: Arc<ValidationStage>,
    batcher: BatchAccumulator<PreviewRecord>,
}

#[async_trait]
impl JobHandler for ImportJobHandler {
    async fn handle(&self, job: &QueueJob) -> Result<()> {
        let payload: RecordJobPayload = serde_json::from_value(job.data.clone())?;
        let mut record = payload.record;

        if !self.validation.validate_one(&mut record) {
            tracing::debug!(
                job_id = %job.id,
                record_id = %record.id,
                errors = ?record.errors,
                "record rejected by validation"
            );
            return Ok(());
        }

        self.batcher.add_to_batch(record).await;
        Ok(())
    }
}

/// Moves accumulated records onto the `Enrichment` queue.
struct EnrichmentDispatcher {
    orchestrator: Weak<JobQueueOrchestrator>,
}

#[async_trait]
impl BatchProcessor<PreviewRecord> for EnrichmentDispatcher {
    async fn process(&self, item: BatchItem<PreviewRecord>) -> Result<()> {
        let orchestrator = self.orchestrator.upgrade().ok_or_else(|| {
            PipelineError::Infrastructure("orchestrator is gone".to_string())
        })?;
        let payload = serde_json::to_value(RecordJobPayload {
            record: item.payload,
        })?;
        orchestrator
            .enqueue(QueueName::Enrichment, payload, EnqueueOptions::new())
            .await?;
        Ok(())
    }
}

/// Enriches one record and persists the canonical result. Lookup failures
/// propagate so the orchestrator applies backoff and retention.
struct EnrichmentJobHandler {
    enrichment: Arc<EnrichmentStage>,
    repository: Arc<dyn RecordRepository>,
    orchestrator: Weak<JobQueueOrchestrator>,
}

#[async_trait]
impl JobHandler for EnrichmentJobHandler {
    async fn handle(&self, job: &QueueJob) -> Result<()> {
        let payload: RecordJobPayload = serde_json::from_value(job.data.clone())?;
        let mut record = payload.record;

        self.enrichment.enrich_one(&mut record).await?;

        let place = record
            .enriched
            .as_ref()
            .and_then(|e| e.place.as_ref())
            .ok_or_else(|| {
                PipelineError::ExternalService("enrichment produced no place".to_string())
            })?;
        let stored = self.repository.create(place.clone()).await?;

        if let Some(orchestrator) = self.orchestrator.upgrade() {
            for photo_reference in &stored.details.photos {
                let payload = serde_json::to_value(ImageJobPayload {
                    place_id: stored.place_id.clone(),
                    photo_reference: photo_reference.clone(),
                })?;
                orchestrator
                    .enqueue(QueueName::Image, payload, EnqueueOptions::new())
                    .await?;
            }
        }
        Ok(())
    }
}

/// Resolves a photo reference to a URL on the stored record.
struct ImageJobHandler {
    lookup: Arc<dyn PlaceLookup>,
    repository: Arc<dyn RecordRepository>,
}

#[async_trait]
impl JobHandler for ImageJobHandler {
    async fn handle(&self, job: &QueueJob) -> Result<()> {
        let payload: ImageJobPayload = serde_json::from_value(job.data.clone())?;
        let url = self.lookup.photo_url(&payload.photo_reference).await?;
        self.repository.add_photo_url(&payload.place_id, url).await?;
        Ok(())
    }
}
