//! # Record Repository
//!
//! The persistence boundary for enriched location records. The pipeline
//! only knows this trait; the backing store (CMS, database, search index)
//! is a deployment concern. Creation is an upsert keyed by place id, which
//! makes persisting an enriched record idempotent under retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::import::record::PlaceDetails;

/// A persisted location record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub place_id: String,
    pub details: PlaceDetails,
    /// Resolved photo URLs, filled in by image jobs after creation
    pub photo_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Create or replace the record for this place. Idempotent by place id.
    async fn create(&self, details: PlaceDetails) -> Result<StoredRecord>;

    async fn find(&self, place_id: &str) -> Result<Option<StoredRecord>>;

    /// Append a resolved photo URL to an existing record.
    async fn add_photo_url(&self, place_id: &str, url: String) -> Result<()>;

    async fn delete(&self, place_id: &str) -> Result<bool>;

    async fn count(&self) -> Result<u64>;
}

/// In-memory repository used by tests and offline runs.
#[derive(Default)]
pub struct InMemoryRecordRepository {
    records: DashMap<String, StoredRecord>,
}

impl InMemoryRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordRepository for InMemoryRecordRepository {
    async fn create(&self, details: PlaceDetails) -> Result<StoredRecord> {
        let now = Utc::now();
        let record = match self.records.get(&details.place_id) {
            Some(existing) => StoredRecord {
                place_id: details.place_id.clone(),
                details,
                photo_urls: existing.photo_urls.clone(),
                created_at: existing.created_at,
                updated_at: now,
            },
            None => StoredRecord {
                place_id: details.place_id.clone(),
                details,
                photo_urls: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        };
        self.records.insert(record.place_id.clone(), record.clone());
        Ok(record)
    }

    async fn find(&self, place_id: &str) -> Result<Option<StoredRecord>> {
        Ok(self.records.get(place_id).map(|r| r.clone()))
    }

    async fn add_photo_url(&self, place_id: &str, url: String) -> Result<()> {
        let mut record = self.records.get_mut(place_id).ok_or_else(|| {
            PipelineError::Infrastructure(format!("no record for place {place_id}"))
        })?;
        if !record.photo_urls.contains(&url) {
            record.photo_urls.push(url);
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, place_id: &str) -> Result<bool> {
        Ok(self.records.remove(place_id).is_some())
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(place_id: &str) -> PlaceDetails {
        PlaceDetails {
            place_id: place_id.to_string(),
            name: "Somewhere".to_string(),
            formatted_address: None,
            latitude: 37.5,
            longitude: 127.0,
            opening_hours: vec![],
            photos: vec![],
            rating: None,
            types: vec![],
        }
    }

    #[tokio::test]
    async fn create_is_idempotent_by_place_id() {
        let repo = InMemoryRecordRepository::new();
        let first = repo.create(details("p1")).await.unwrap();
        let second = repo.create(details("p1")).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn photo_urls_accumulate_without_duplicates() {
        let repo = InMemoryRecordRepository::new();
        repo.create(details("p1")).await.unwrap();
        repo.add_photo_url("p1", "https://x/1".to_string()).await.unwrap();
        repo.add_photo_url("p1", "https://x/1".to_string()).await.unwrap();
        repo.add_photo_url("p1", "https://x/2".to_string()).await.unwrap();

        let record = repo.find("p1").await.unwrap().unwrap();
        assert_eq!(record.photo_urls.len(), 2);

        let err = repo.add_photo_url("missing", "u".to_string()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Infrastructure(_)));
    }
}
