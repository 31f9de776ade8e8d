//! # Enrichment Stage
//!
//! Resolves validated records against an external place-lookup service
//! behind the [`PlaceLookup`] trait. The HTTP client owns transport-level
//! retry (bounded attempts, exponential backoff with jitter); the stage
//! owns concurrency capping and per-record failure isolation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::config::EnrichmentConfig;
use crate::error::{PipelineError, Result};
use crate::import::record::{
    EnrichmentOutcome, PlaceDetails, PreviewRecord, RecordStatus, StageOutcome, StageStats,
};

/// The external place-lookup collaborator.
#[async_trait]
pub trait PlaceLookup: Send + Sync {
    /// Resolve a free-text query to a place id, `None` when nothing matches.
    async fn search_place(&self, query: &str) -> Result<Option<String>>;

    /// Full details for a known place id.
    async fn place_details(&self, place_id: &str) -> Result<PlaceDetails>;

    /// Resolve a photo reference to a fetchable URL.
    async fn photo_url(&self, photo_reference: &str) -> Result<String>;
}

pub struct EnrichmentStage {
    lookup: Arc<dyn PlaceLookup>,
    semaphore: Arc<Semaphore>,
    max_photos: usize,
}

impl EnrichmentStage {
    pub fn new(lookup: Arc<dyn PlaceLookup>, config: &EnrichmentConfig) -> Self {
        Self {
            lookup,
            semaphore: Arc::new(Semaphore::new(config.max_parallel_requests.max(1))),
            max_photos: config.max_photos_per_place,
        }
    }

    /// Enrich every validated record concurrently, capped by the semaphore.
    /// Records that did not pass validation flow through untouched and are
    /// excluded from the stage tally. Order is preserved.
    pub async fn enrich(&self, records: Vec<PreviewRecord>) -> StageOutcome {
        let results = join_all(records.into_iter().map(|mut record| async move {
            if record.status != RecordStatus::Validated {
                return record;
            }
            if let Err(err) = self.enrich_one(&mut record).await {
                tracing::warn!(record_id = %record.id, error = %err, "enrichment failed");
                record.enriched = Some(EnrichmentOutcome {
                    success: false,
                    place_id: None,
                    place: None,
                });
                record.mark_failed(err.to_string());
            }
            record
        }))
        .await;

        let mut stats = StageStats::default();
        for record in &results {
            match record.status {
                RecordStatus::Enriched => stats.record_success(),
                RecordStatus::Failed => stats.record_failure(),
                _ => {}
            }
        }
        StageOutcome { results, stats }
    }

    /// Resolve one record: text search (skipped when a place id is already
    /// known), then details, photos bounded.
    pub async fn enrich_one(&self, record: &mut PreviewRecord) -> Result<()> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::Infrastructure("enrichment semaphore closed".to_string()))?;

        let known_place_id = record.enriched.as_ref().and_then(|e| e.place_id.clone());
        let place_id = match known_place_id {
            Some(place_id) => place_id,
            None => {
                let title = record
                    .title()
                    .ok_or_else(|| PipelineError::Validation("record has no title".to_string()))?;
                self.lookup.search_place(title).await?.ok_or_else(|| {
                    PipelineError::ExternalService(format!("no place candidates for {title:?}"))
                })?
            }
        };

        let mut place = self.lookup.place_details(&place_id).await?;
        place.photos.truncate(self.max_photos);

        record.enriched = Some(EnrichmentOutcome {
            success: true,
            place_id: Some(place_id),
            place: Some(place),
        });
        record.status = RecordStatus::Enriched;
        Ok(())
    }

    pub fn lookup(&self) -> Arc<dyn PlaceLookup> {
        Arc::clone(&self.lookup)
    }
}

const MAX_BACKOFF_EXPONENT: u32 = 6;

/// HTTP client for a Places-style lookup API.
#[derive(Debug)]
pub struct HttpPlaceLookup {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_attempts: u32,
    retry_base_ms: u64,
}

impl HttpPlaceLookup {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            PipelineError::Configuration("place lookup API key is not configured".to_string())
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_attempts: config.max_attempts.max(1),
            retry_base_ms: config.retry_base_ms.max(1),
        })
    }

    async fn with_retry<T, Fut>(&self, op: impl Fn() -> Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts && is_retryable(&err) => {
                    let delay = self.retry_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "place lookup attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
        let base = self.retry_base_ms.saturating_mul(1 << exponent);
        let jitter = fastrand::u64(0..self.retry_base_ms);
        Duration::from_millis(base.saturating_add(jitter))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .http
            .get(format!("{}/{path}", self.base_url))
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited(
                "place lookup returned 429".to_string(),
            ));
        }
        let response = response.error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

fn is_retryable(err: &PipelineError) -> bool {
    matches!(
        err,
        PipelineError::RateLimited(_) | PipelineError::ExternalService(_)
    )
}

/// Statuses the lookup API reports inside a 200 body.
fn check_body_status(status: &str) -> Result<()> {
    match status {
        "OK" | "ZERO_RESULTS" => Ok(()),
        "OVER_QUERY_LIMIT" | "RESOURCE_EXHAUSTED" => Err(PipelineError::RateLimited(format!(
            "place lookup quota exhausted: {status}"
        ))),
        "REQUEST_DENIED" | "INVALID_REQUEST" => Err(PipelineError::Configuration(format!(
            "place lookup rejected the request: {status}"
        ))),
        other => Err(PipelineError::ExternalService(format!(
            "place lookup status: {other}"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    status: String,
    #[serde(default)]
    results: Vec<SearchCandidate>,
}

#[derive(Debug, Deserialize)]
struct SearchCandidate {
    place_id: String,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    status: String,
    result: Option<DetailsResult>,
}

#[derive(Debug, Deserialize)]
struct DetailsResult {
    place_id: String,
    name: String,
    formatted_address: Option<String>,
    geometry: Geometry,
    opening_hours: Option<OpeningHours>,
    #[serde(default)]
    photos: Vec<Photo>,
    rating: Option<f64>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: Location,
}

#[derive(Debug, Deserialize)]
struct Location {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct OpeningHours {
    #[serde(default)]
    weekday_text: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    photo_reference: String,
}

#[async_trait]
impl PlaceLookup for HttpPlaceLookup {
    async fn search_place(&self, query: &str) -> Result<Option<String>> {
        self.with_retry(|| async {
            let body: SearchResponse = self
                .get_json("textsearch/json", &[("query", query)])
                .await?;
            check_body_status(&body.status)?;
            Ok(body.results.into_iter().next().map(|c| c.place_id))
        })
        .await
    }

    async fn place_details(&self, place_id: &str) -> Result<PlaceDetails> {
        const FIELDS: &str =
            "place_id,name,formatted_address,geometry,opening_hours,photos,rating,types";
        self.with_retry(|| async {
            let body: DetailsResponse = self
                .get_json(
                    "details/json",
                    &[("place_id", place_id), ("fields", FIELDS)],
                )
                .await?;
            check_body_status(&body.status)?;
            let result = body.result.ok_or_else(|| {
                PipelineError::ExternalService(format!("no details for place {place_id}"))
            })?;
            Ok(PlaceDetails {
                place_id: result.place_id,
                name: result.name,
                formatted_address: result.formatted_address,
                latitude: result.geometry.location.lat,
                longitude: result.geometry.location.lng,
                opening_hours: result
                    .opening_hours
                    .map(|h| h.weekday_text)
                    .unwrap_or_default(),
                photos: result
                    .photos
                    .into_iter()
                    .map(|p| p.photo_reference)
                    .collect(),
                rating: result.rating,
                types: result.types,
            })
        })
        .await
    }

    async fn photo_url(&self, photo_reference: &str) -> Result<String> {
        // The photo endpoint serves a redirect; the URL itself is the artifact.
        let url = reqwest::Url::parse_with_params(
            &format!("{}/photo", self.base_url),
            &[
                ("maxwidth", "800"),
                ("photo_reference", photo_reference),
                ("key", self.api_key.as_str()),
            ],
        )
        .map_err(|e| PipelineError::Configuration(format!("bad lookup base url: {e}")))?;
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeLookup {
        fail_titles: Vec<String>,
        calls: AtomicUsize,
    }

    impl FakeLookup {
        fn new(fail_titles: &[&str]) -> Self {
            Self {
                fail_titles: fail_titles.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PlaceLookup for FakeLookup {
        async fn search_place(&self, query: &str) -> Result<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_titles.iter().any(|t| t == query) {
                return Err(PipelineError::ExternalService("upstream down".to_string()));
            }
            Ok(Some(format!("place-{query}")))
        }

        async fn place_details(&self, place_id: &str) -> Result<PlaceDetails> {
            Ok(PlaceDetails {
                place_id: place_id.to_string(),
                name: place_id.to_string(),
                formatted_address: Some("Seoul".to_string()),
                latitude: 37.57,
                longitude: 126.98,
                opening_hours: vec![],
                photos: vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()],
                rating: Some(4.5),
                types: vec!["point_of_interest".to_string()],
            })
        }

        async fn photo_url(&self, photo_reference: &str) -> Result<String> {
            Ok(format!("https://photos.test/{photo_reference}"))
        }
    }

    fn validated(title: &str) -> PreviewRecord {
        let mut record = PreviewRecord::new(BTreeMap::from([(
            "Title".to_string(),
            title.to_string(),
        )]));
        record.status = RecordStatus::Validated;
        record
    }

    #[tokio::test]
    async fn failure_is_isolated_to_one_record() {
        let stage = EnrichmentStage::new(
            Arc::new(FakeLookup::new(&["Broken"])),
            &EnrichmentConfig::default(),
        );
        let outcome = stage
            .enrich(vec![validated("Good"), validated("Broken"), validated("Also Good")])
            .await;

        assert_eq!(outcome.stats.total, 3);
        assert_eq!(outcome.stats.success, 2);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.results[0].status, RecordStatus::Enriched);
        assert_eq!(outcome.results[1].status, RecordStatus::Failed);
        assert!(!outcome.results[1].enriched.as_ref().unwrap().success);
        assert_eq!(outcome.results[2].status, RecordStatus::Enriched);
    }

    #[tokio::test]
    async fn photos_are_bounded_by_config() {
        let config = EnrichmentConfig {
            max_photos_per_place: 3,
            ..EnrichmentConfig::default()
        };
        let stage = EnrichmentStage::new(Arc::new(FakeLookup::new(&[])), &config);
        let outcome = stage.enrich(vec![validated("Gwangjang Market")]).await;

        let place = outcome.results[0]
            .enriched
            .as_ref()
            .unwrap()
            .place
            .as_ref()
            .unwrap();
        assert_eq!(place.photos.len(), 3);
    }

    #[tokio::test]
    async fn invalid_records_are_skipped_untouched() {
        let stage = EnrichmentStage::new(
            Arc::new(FakeLookup::new(&[])),
            &EnrichmentConfig::default(),
        );
        let mut invalid = validated("x");
        invalid.mark_invalid("no good");

        let outcome = stage.enrich(vec![invalid]).await;
        assert_eq!(outcome.stats.total, 0);
        assert_eq!(outcome.results[0].status, RecordStatus::Invalid);
        assert!(outcome.results[0].enriched.is_none());
    }

    #[tokio::test]
    async fn known_place_id_skips_the_search() {
        let lookup = Arc::new(FakeLookup::new(&[]));
        let stage = EnrichmentStage::new(lookup.clone(), &EnrichmentConfig::default());

        let mut record = validated("Some Market");
        record.enriched = Some(crate::import::record::EnrichmentOutcome {
            success: false,
            place_id: Some("place-already-known".to_string()),
            place: None,
        });

        stage.enrich_one(&mut record).await.unwrap();

        assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
        assert_eq!(record.status, RecordStatus::Enriched);
        let enriched = record.enriched.unwrap();
        assert_eq!(enriched.place_id.as_deref(), Some("place-already-known"));
        assert_eq!(
            enriched.place.unwrap().place_id,
            "place-already-known"
        );
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let err = HttpPlaceLookup::new(&EnrichmentConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn body_status_classification() {
        assert!(check_body_status("OK").is_ok());
        assert!(matches!(
            check_body_status("OVER_QUERY_LIMIT"),
            Err(PipelineError::RateLimited(_))
        ));
        assert!(matches!(
            check_body_status("REQUEST_DENIED"),
            Err(PipelineError::Configuration(_))
        ));
        assert!(matches!(
            check_body_status("UNKNOWN_ERROR"),
            Err(PipelineError::ExternalService(_))
        ));
    }
}
