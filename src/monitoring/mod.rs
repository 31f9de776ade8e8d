//! Observability over the queues: failure classification and periodic
//! metrics snapshots, both fed by the job event stream.

pub mod error_classifier;
pub mod metrics;

pub use error_classifier::{classify, ErrorClassifier, ErrorKind, ErrorRecord, ErrorStats};
pub use metrics::{MetricsCollector, MetricsSnapshot};
