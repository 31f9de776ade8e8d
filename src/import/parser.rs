//! # Record Parser
//!
//! CSV intake for the import surface. Header validation is atomic: a file
//! missing any required header is rejected in full, before any row is
//! inspected, with every missing header named in the error.

use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};
use crate::import::record::{PreviewRecord, REQUIRED_HEADERS};

pub struct RecordParser;

impl RecordParser {
    /// Parse CSV text into preview records.
    ///
    /// Rows whose fields are all empty or whitespace are dropped silently;
    /// rows with a different field count than the header are a structural
    /// failure, consistent with all-or-nothing intake.
    pub fn parse(input: &str) -> Result<Vec<PreviewRecord>> {
        if input.trim().is_empty() {
            return Err(PipelineError::Structural("empty input file".to_string()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(input.as_bytes());

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let missing: Vec<&str> = REQUIRED_HEADERS
            .iter()
            .filter(|required| !headers.iter().any(|h| h == *required))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Structural(format!(
                "missing required headers: {}",
                missing.join(", ")
            )));
        }

        let mut records = Vec::new();
        for row in reader.records() {
            let row = row?;
            if row.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            let original: BTreeMap<String, String> = headers
                .iter()
                .cloned()
                .zip(row.iter().map(|field| field.to_string()))
                .collect();
            records.push(PreviewRecord::new(original));
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::record::RecordStatus;

    const GOOD_CSV: &str = "\
Title,Note,URL,Comment
Gwangjang Market,street food,https://example.com/1,must visit
Bukchon Village,hanok area,https://example.com/2,";

    #[test]
    fn parses_rows_into_pending_records() {
        let records = RecordParser::parse(GOOD_CSV).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title(), Some("Gwangjang Market"));
        assert_eq!(records[0].status, RecordStatus::Pending);
        // Empty Comment reads as absent, not as an empty string.
        assert_eq!(records[1].field("Comment"), None);
    }

    #[test]
    fn missing_headers_name_every_absence() {
        let input = "Title,URL\nSomewhere,https://example.com";
        let err = RecordParser::parse(input).unwrap_err();
        match err {
            PipelineError::Structural(msg) => {
                assert!(msg.contains("Note"));
                assert!(msg.contains("Comment"));
                assert!(!msg.contains("Title,"));
            }
            other => panic!("expected structural error, got {other:?}"),
        }
    }

    #[test]
    fn empty_input_is_structural() {
        assert!(matches!(
            RecordParser::parse("   \n  "),
            Err(PipelineError::Structural(_))
        ));
    }

    #[test]
    fn blank_rows_are_dropped() {
        let input = "Title,Note,URL,Comment\n,,,\nPlace,,,\n , , , ";
        let records = RecordParser::parse(input).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title(), Some("Place"));
    }

    #[test]
    fn ragged_rows_fail_the_whole_file() {
        let input = "Title,Note,URL,Comment\nPlace,note";
        assert!(matches!(
            RecordParser::parse(input),
            Err(PipelineError::Structural(_))
        ));
    }

    #[test]
    fn extra_headers_are_retained() {
        let input = "Title,Note,URL,Comment,Latitude,Longitude\nPlace,,,,37.5,127.0";
        let records = RecordParser::parse(input).unwrap();
        assert_eq!(records[0].coordinates(), Some(("37.5", "127.0")));
    }
}
