//! # Validation Stage
//!
//! Field and geographic checks over parsed records. Validation never
//! aborts: every record is examined, rejected records are marked and
//! carried along for reporting, and the stage tally reflects the split.

use crate::config::ValidationConfig;
use crate::import::record::{PreviewRecord, RecordStatus, StageOutcome, StageStats};

pub struct ValidationStage {
    config: ValidationConfig,
}

impl ValidationStage {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate every record, preserving input order.
    pub fn validate(&self, mut records: Vec<PreviewRecord>) -> StageOutcome {
        let mut stats = StageStats::default();
        for record in &mut records {
            if self.validate_one(record) {
                stats.record_success();
            } else {
                stats.record_failure();
            }
        }
        StageOutcome { results: records, stats }
    }

    /// Validate a single record in place. Returns whether it passed.
    ///
    /// All applicable problems are collected before the verdict, so a
    /// record missing a title AND carrying bad coordinates reports both.
    pub fn validate_one(&self, record: &mut PreviewRecord) -> bool {
        let mut problems = Vec::new();

        if record.title().is_none() {
            problems.push("Title is required".to_string());
        }

        if let Some((lat_raw, lng_raw)) = record.coordinates() {
            match (lat_raw.parse::<f64>(), lng_raw.parse::<f64>()) {
                (Ok(lat), Ok(lng)) => {
                    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                        problems.push(format!("coordinates out of range: ({lat}, {lng})"));
                    } else if lat < self.config.min_latitude
                        || lat > self.config.max_latitude
                        || lng < self.config.min_longitude
                        || lng > self.config.max_longitude
                    {
                        problems.push(format!(
                            "coordinates outside service area: ({lat}, {lng})"
                        ));
                    }
                }
                _ => problems.push(format!(
                    "unparsable coordinates: ({lat_raw}, {lng_raw})"
                )),
            }
        }

        if problems.is_empty() {
            record.status = RecordStatus::Validated;
            true
        } else {
            for problem in problems {
                record.mark_invalid(problem);
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn stage() -> ValidationStage {
        ValidationStage::new(ValidationConfig::default())
    }

    fn record_with(fields: &[(&str, &str)]) -> PreviewRecord {
        PreviewRecord::new(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn title_is_mandatory() {
        let mut record = record_with(&[("Note", "no title here")]);
        assert!(!stage().validate_one(&mut record));
        assert_eq!(record.status, RecordStatus::Invalid);
        assert!(record.errors[0].contains("Title"));
    }

    #[test]
    fn records_without_coordinates_pass_on_title_alone() {
        let mut record = record_with(&[("Title", "Gwangjang Market")]);
        assert!(stage().validate_one(&mut record));
        assert_eq!(record.status, RecordStatus::Validated);
    }

    #[test]
    fn global_range_checked_before_service_area() {
        let mut record = record_with(&[
            ("Title", "x"),
            ("Latitude", "95.0"),
            ("Longitude", "127.0"),
        ]);
        assert!(!stage().validate_one(&mut record));
        assert!(record.errors[0].contains("out of range"));

        let mut record = record_with(&[
            ("Title", "x"),
            ("Latitude", "48.8"),
            ("Longitude", "2.3"),
        ]);
        assert!(!stage().validate_one(&mut record));
        assert!(record.errors[0].contains("service area"));
    }

    #[test]
    fn unparsable_coordinates_are_flagged() {
        let mut record = record_with(&[
            ("Title", "x"),
            ("Latitude", "north-ish"),
            ("Longitude", "127.0"),
        ]);
        assert!(!stage().validate_one(&mut record));
        assert!(record.errors[0].contains("unparsable"));
    }

    #[test]
    fn all_problems_are_collected() {
        let mut record = record_with(&[("Latitude", "abc"), ("Longitude", "127.0")]);
        stage().validate_one(&mut record);
        assert_eq!(record.errors.len(), 2);
    }

    #[test]
    fn stage_outcome_keeps_rejected_records() {
        let records = vec![
            record_with(&[("Title", "good")]),
            record_with(&[("Note", "missing title")]),
        ];
        let outcome = stage().validate(records);
        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.stats.total, 2);
        assert_eq!(outcome.stats.success, 1);
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.results[1].status, RecordStatus::Invalid);
    }
}
