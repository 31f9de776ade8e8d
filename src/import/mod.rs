//! Record intake: parsing, validation, enrichment, and persistence of
//! imported location records, wired to the queues by the pipeline.

pub mod enrichment;
pub mod parser;
pub mod pipeline;
pub mod record;
pub mod repository;
pub mod validation;

pub use enrichment::{EnrichmentStage, HttpPlaceLookup, PlaceLookup};
pub use parser::RecordParser;
pub use pipeline::{ImageJobPayload, ImportPipeline, RecordJobPayload};
pub use record::{
    EnrichmentOutcome, PlaceDetails, PreviewRecord, RecordStatus, StageOutcome, StageStats,
    REQUIRED_HEADERS,
};
pub use repository::{InMemoryRecordRepository, RecordRepository, StoredRecord};
pub use validation::ValidationStage;
