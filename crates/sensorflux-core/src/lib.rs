//! Bounded, multi-stage concurrent processing of sensor records.
//!
//! Records flow from a [`Generator`](stages::Generator) through validator and
//! transformer worker pools, are split by fan-out tasks towards the JSON-lines
//! sinks and the [`MetricsAggregator`](metrics::MetricsAggregator), and the
//! [`Pipeline`](pipeline::Pipeline) closes every queue exactly once when its
//! producers are done.

pub mod completion;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod mux;
pub mod pipeline;
pub mod queue;
pub mod rules;
pub mod stages;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use model::{MetricsSnapshot, ProcessedRecord, Record, RecordStatus};
pub use pipeline::{Pipeline, RunSummary};
pub use queue::BoundedQueue;
