//! # Placeflow
//!
//! Bulk location-record ingestion: CSV intake, validation, enrichment
//! against an external place-lookup service, and persistence, executed
//! through durable named job queues with batching, retry with exponential
//! backoff, failure classification, and live metrics.
//!
//! ## Architecture
//!
//! - [`import`]: parsing, validation, enrichment, and the pipeline that
//!   wires stages to queues.
//! - [`queue`]: the SQLite-backed job store, the orchestrator that owns
//!   job state transitions, and the batch accumulator.
//! - [`monitoring`]: error classification and metrics, fed passively by
//!   the job event stream.
//! - [`web`]: the HTTP management and intake surface.

#![allow(clippy::too_many_arguments)]

pub mod config;
pub mod error;
pub mod events;
pub mod import;
pub mod logging;
pub mod monitoring;
pub mod queue;
pub mod web;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use events::{EventPublisher, JobEvent, JobEventKind};
pub use import::pipeline::ImportPipeline;
pub use queue::orchestrator::JobQueueOrchestrator;
pub use queue::store::JobStore;
