//! Full-pipeline tests: CSV intake through validation, enrichment, and
//! persistence over the durable queues, with a fake lookup collaborator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use placeflow::config::PipelineConfig;
use placeflow::error::{PipelineError, Result};
use placeflow::events::EventPublisher;
use placeflow::import::enrichment::PlaceLookup;
use placeflow::import::pipeline::ImportPipeline;
use placeflow::import::record::PlaceDetails;
use placeflow::import::repository::{InMemoryRecordRepository, RecordRepository};
use placeflow::queue::job::QueueName;
use placeflow::queue::orchestrator::JobQueueOrchestrator;
use placeflow::queue::store::JobStore;

/// Deterministic lookup collaborator: resolves every title except the
/// configured poison titles, two photo references per place.
struct FakePlaceLookup {
    fail_titles: Vec<String>,
}

impl FakePlaceLookup {
    fn new(fail_titles: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fail_titles: fail_titles.iter().map(|s| s.to_string()).collect(),
        })
    }
}

#[async_trait]
impl PlaceLookup for FakePlaceLookup {
    async fn search_place(&self, query: &str) -> Result<Option<String>> {
        if self.fail_titles.iter().any(|t| t == query) {
            return Err(PipelineError::ExternalService(format!(
                "lookup refused for {query}"
            )));
        }
        Ok(Some(format!("place-{}", query.replace(' ', "-").to_lowercase())))
    }

    async fn place_details(&self, place_id: &str) -> Result<PlaceDetails> {
        Ok(PlaceDetails {
            place_id: place_id.to_string(),
            name: place_id.to_string(),
            formatted_address: Some("Seoul, South Korea".to_string()),
            latitude: 37.57,
            longitude: 126.98,
            opening_hours: vec!["Monday: 9 AM - 6 PM".to_string()],
            photos: vec![format!("{place_id}-photo-1"), format!("{place_id}-photo-2")],
            rating: Some(4.4),
            types: vec!["point_of_interest".to_string()],
        })
    }

    async fn photo_url(&self, photo_reference: &str) -> Result<String> {
        Ok(format!("https://photos.test/{photo_reference}"))
    }
}

fn fast_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.queue.concurrency = 2;
    config.queue.poll_interval_ms = 10;
    config.queue.initial_backoff_ms = 10;
    config.queue.shutdown_timeout_ms = 2_000;
    config.batch.batch_size = 2;
    config.batch.batch_timeout_ms = 50;
    config
}

struct Harness {
    pipeline: Arc<ImportPipeline>,
    orchestrator: Arc<JobQueueOrchestrator>,
    repository: Arc<InMemoryRecordRepository>,
}

async fn harness(fail_titles: &[&str]) -> Harness {
    let config = fast_config();
    let store = Arc::new(JobStore::open_in_memory().await.unwrap());
    let orchestrator =
        JobQueueOrchestrator::new(store, config.queue.clone(), EventPublisher::default());
    let repository = Arc::new(InMemoryRecordRepository::new());
    let pipeline = ImportPipeline::new(
        config,
        orchestrator.clone(),
        FakePlaceLookup::new(fail_titles),
        repository.clone(),
    );
    orchestrator.start();
    Harness {
        pipeline,
        orchestrator,
        repository,
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

const SIX_ROWS: &str = "\
Title,Note,URL,Comment
Gwangjang Market,street food,https://example.com/1,must try bindaetteok
Bukchon Hanok Village,traditional houses,https://example.com/2,go early
Gyeongbokgung Palace,main palace,https://example.com/3,guard ceremony
Namsan Tower,city views,https://example.com/4,sunset
Hongdae,nightlife,https://example.com/5,
Dongdaemun Design Plaza,architecture,https://example.com/6,late night market";

#[tokio::test]
async fn six_good_rows_flow_to_the_repository() {
    let h = harness(&[]).await;

    let stats = h.pipeline.import(SIX_ROWS).await.unwrap();
    assert_eq!(stats.total, 6);
    assert_eq!(stats.success, 6);
    assert_eq!(stats.failed, 0);

    wait_for(|| async { h.repository.count().await.unwrap() == 6 }).await;

    // Image jobs fan out per photo reference and resolve URLs.
    wait_for(|| async {
        h.repository
            .find("place-namsan-tower")
            .await
            .unwrap()
            .is_some_and(|r| r.photo_urls.len() == 2)
    })
    .await;

    let record = h.repository.find("place-hongdae").await.unwrap().unwrap();
    assert!(record.photo_urls[0].starts_with("https://photos.test/"));

    h.pipeline.flush_pending().await;
    h.orchestrator.close().await;
}

#[tokio::test]
async fn missing_header_rejects_the_whole_file() {
    let h = harness(&[]).await;
    let input = "Title,Note,URL\nSomewhere,note,https://example.com";

    let err = h.pipeline.import(input).await.unwrap_err();
    match err {
        PipelineError::Structural(msg) => assert!(msg.contains("Comment")),
        other => panic!("expected structural error, got {other:?}"),
    }

    // Atomic rejection: nothing was enqueued.
    for queue in QueueName::ALL {
        let counts = h.orchestrator.get_job_counts(queue).await.unwrap();
        assert_eq!(counts.total(), 0, "queue {queue} should be empty");
    }
    h.orchestrator.close().await;
}

#[tokio::test]
async fn oversize_file_is_rejected_before_parsing() {
    let mut config = fast_config();
    config.import.max_file_size_bytes = 64;
    let store = Arc::new(JobStore::open_in_memory().await.unwrap());
    let orchestrator =
        JobQueueOrchestrator::new(store, config.queue.clone(), EventPublisher::default());
    let pipeline = ImportPipeline::new(
        config,
        orchestrator.clone(),
        FakePlaceLookup::new(&[]),
        Arc::new(InMemoryRecordRepository::new()),
    );

    let err = pipeline.import(SIX_ROWS).await.unwrap_err();
    assert!(matches!(err, PipelineError::Structural(_)));
    orchestrator.close().await;
}

#[tokio::test]
async fn enrichment_failure_is_isolated_and_retained() {
    let h = harness(&["Hongdae"]).await;

    h.pipeline.import(SIX_ROWS).await.unwrap();

    // The five resolvable records persist.
    wait_for(|| async { h.repository.count().await.unwrap() == 5 }).await;
    assert!(h.repository.find("place-hongdae").await.unwrap().is_none());

    // The poisoned record exhausts its retries and is retained as failed.
    wait_for(|| async {
        h.orchestrator
            .get_job_counts(QueueName::Enrichment)
            .await
            .unwrap()
            .failed
            == 1
    })
    .await;

    let (failed_jobs, total) = h
        .orchestrator
        .list_jobs(
            Some(QueueName::Enrichment),
            Some(placeflow::queue::job::JobState::Failed),
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(failed_jobs[0].attempts_made, failed_jobs[0].max_attempts);
    assert!(failed_jobs[0]
        .failed_reason
        .as_deref()
        .unwrap()
        .contains("Hongdae"));

    h.orchestrator.close().await;
}

#[tokio::test]
async fn invalid_records_are_absorbed_without_failing_jobs() {
    let h = harness(&[]).await;
    let input = "\
Title,Note,URL,Comment,Latitude,Longitude
Good Place,,,,37.5,127.0
,missing title,,,37.5,127.0
Far Away,,,,48.8,2.3";

    let stats = h.pipeline.import(input).await.unwrap();
    assert_eq!(stats.total, 3);

    // Only the valid record reaches the repository; the import jobs for
    // the invalid ones still complete.
    wait_for(|| async { h.repository.count().await.unwrap() == 1 }).await;
    wait_for(|| async {
        h.orchestrator
            .get_job_counts(QueueName::Import)
            .await
            .unwrap()
            .completed
            == 3
    })
    .await;

    let counts = h.orchestrator.get_job_counts(QueueName::Import).await.unwrap();
    assert_eq!(counts.failed, 0);

    h.orchestrator.close().await;
}
