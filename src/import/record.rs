//! # Import Record Model
//!
//! The record shape that flows through every pipeline stage, the stage
//! outcome/stats pair every stage returns, and the enriched place details
//! produced by the lookup collaborator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Headers a source file must carry. Order in the file is irrelevant;
/// presence is mandatory.
pub const REQUIRED_HEADERS: [&str; 4] = ["Title", "Note", "URL", "Comment"];

/// Where a record stands in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Parsed, not yet validated
    Pending,
    /// Passed validation
    Validated,
    /// Rejected by validation; excluded from downstream stages
    Invalid,
    /// Resolved against the lookup collaborator
    Enriched,
    /// Enrichment gave up on this record
    Failed,
}

/// One source row carried through parse, validation, and enrichment.
///
/// The original fields are kept verbatim so operators can inspect exactly
/// what was submitted; stage outcomes are layered on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewRecord {
    pub id: Uuid,
    /// Raw header → value mapping from the source row
    pub original: BTreeMap<String, String>,
    pub status: RecordStatus,
    pub enriched: Option<EnrichmentOutcome>,
    /// Accumulated human-readable problems for this record
    pub errors: Vec<String>,
}

impl PreviewRecord {
    pub fn new(original: BTreeMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            original,
            status: RecordStatus::Pending,
            enriched: None,
            errors: Vec::new(),
        }
    }

    /// Original field by header name, empty values treated as absent.
    pub fn field(&self, header: &str) -> Option<&str> {
        self.original
            .get(header)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn title(&self) -> Option<&str> {
        self.field("Title")
    }

    /// Optional explicit coordinates from the source row, unparsed.
    pub fn coordinates(&self) -> Option<(&str, &str)> {
        match (self.field("Latitude"), self.field("Longitude")) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }

    pub fn mark_invalid(&mut self, reason: impl Into<String>) {
        self.status = RecordStatus::Invalid;
        self.errors.push(reason.into());
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = RecordStatus::Failed;
        self.errors.push(reason.into());
    }
}

/// Result of resolving one record against the lookup collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentOutcome {
    pub success: bool,
    pub place_id: Option<String>,
    pub place: Option<PlaceDetails>,
}

/// Canonical place details returned by the lookup collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceDetails {
    pub place_id: String,
    pub name: String,
    pub formatted_address: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub opening_hours: Vec<String>,
    /// Photo references, bounded per configuration
    pub photos: Vec<String>,
    pub rating: Option<f64>,
    pub types: Vec<String>,
}

/// Per-stage tally. `total == success + failed` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
}

impl StageStats {
    pub fn record_success(&mut self) {
        self.total += 1;
        self.success += 1;
    }

    pub fn record_failure(&mut self) {
        self.total += 1;
        self.failed += 1;
    }
}

/// What a stage hands to the next one: every record (kept in input order,
/// rejected ones included) plus the tally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub results: Vec<PreviewRecord>,
    pub stats: StageStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(fields: &[(&str, &str)]) -> PreviewRecord {
        PreviewRecord::new(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn empty_fields_read_as_absent() {
        let record = record_with(&[("Title", "  "), ("Note", "cafe")]);
        assert_eq!(record.title(), None);
        assert_eq!(record.field("Note"), Some("cafe"));
        assert_eq!(record.field("URL"), None);
    }

    #[test]
    fn coordinates_require_both_fields() {
        let record = record_with(&[("Latitude", "37.5"), ("Title", "x")]);
        assert_eq!(record.coordinates(), None);

        let record = record_with(&[("Latitude", "37.5"), ("Longitude", "127.0")]);
        assert_eq!(record.coordinates(), Some(("37.5", "127.0")));
    }

    #[test]
    fn stats_stay_consistent() {
        let mut stats = StageStats::default();
        stats.record_success();
        stats.record_success();
        stats.record_failure();
        assert_eq!(stats.total, stats.success + stats.failed);
        assert_eq!(stats.total, 3);
    }

    #[test]
    fn mark_invalid_accumulates_errors() {
        let mut record = record_with(&[("Title", "x")]);
        record.mark_invalid("first");
        record.mark_invalid("second");
        assert_eq!(record.status, RecordStatus::Invalid);
        assert_eq!(record.errors, vec!["first", "second"]);
    }
}
