//! Wires every stage into one run and decides when each queue closes.
//!
//! ```text
//! generator -> raw -> validators -+-> valid -> transformers -> processed -> fan-out -+-> loader
//!                                 |                  |                              +-> metrics
//!                                 +------> errors <--+-----------------> fan-out -+-> error handler
//!                                                                                 +-> metrics
//! ```
//!
//! `valid` and `processed` close when their pool's counter reaches zero.
//! `errors` has two producer pools and closes only once both counters do.
//! Every downstream queue is closed by the fan-out that feeds it.

use std::panic;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::completion::CompletionCounter;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::metrics::MetricsAggregator;
use crate::model::{MetricsSnapshot, ProcessedRecord, Record};
use crate::queue::BoundedQueue;
use crate::rules::{AnomalyScorer, RangeRule, TransformRule, ValidationRule};
use crate::stages::{
    open_destination, FanOut, Generator, JsonLinesSink, SinkReport, TransformerPool,
    ValidatorPool, WorkerReport,
};

pub const LOADER: &str = "loader";
pub const ERROR_HANDLER: &str = "error_handler";

/// What each pipeline task hands back when it exits.
#[derive(Debug)]
pub enum StageOutput {
    Generated(u64),
    Worker(WorkerReport),
    QueueClosed(String),
    FannedOut(u64),
    Sink {
        label: &'static str,
        report: SinkReport,
    },
    Metrics(MetricsSnapshot),
}

impl From<WorkerReport> for StageOutput {
    fn from(report: WorkerReport) -> Self {
        StageOutput::Worker(report)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub records_generated: u64,
    pub metrics: MetricsSnapshot,
    pub loaded: SinkReport,
    pub failed: SinkReport,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    validation: Arc<dyn ValidationRule>,
    transform: Arc<dyn TransformRule>,
}

impl Pipeline {
    /// A pipeline using the reference range and anomaly rules from `config`.
    pub fn new(config: PipelineConfig) -> Self {
        let validation = Arc::new(RangeRule::from(&config.validation));
        let transform = Arc::new(AnomalyScorer::from(&config.transform));
        Self {
            config,
            validation,
            transform,
        }
    }

    pub fn with_validation_rule(mut self, rule: impl ValidationRule + 'static) -> Self {
        self.validation = Arc::new(rule);
        self
    }

    pub fn with_transform_rule(mut self, rule: impl TransformRule + 'static) -> Self {
        self.transform = Arc::new(rule);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the pipeline to completion.
    ///
    /// Both destinations are opened before any task starts; failing to open
    /// either one is the only error this returns besides bad configuration.
    /// A panicking stage is re-raised here.
    pub async fn run(self) -> Result<RunSummary> {
        self.config.validate()?;
        let config = &self.config;

        let processed_out = open_destination(&config.output.processed_path).await?;
        let failed_out = open_destination(&config.output.failed_path).await?;

        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", %run_id);
        let started = Instant::now();
        info!(
            parent: &span,
            records = config.records,
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "pipeline started"
        );

        let capacity = config.queue_capacity;
        let jitter_ms = config.stage_jitter_ms;

        let raw = BoundedQueue::<Record>::new("raw", capacity);
        let valid = BoundedQueue::<Record>::new("valid", capacity);
        let processed = BoundedQueue::<ProcessedRecord>::new("processed", capacity);
        let errors = BoundedQueue::<Record>::new("errors", capacity);
        let loader_in = BoundedQueue::<ProcessedRecord>::new("loader", capacity);
        let error_handler_in = BoundedQueue::<Record>::new("error_handler", capacity);
        let metrics_processed = BoundedQueue::<ProcessedRecord>::new("metrics_processed", capacity);
        let metrics_errors = BoundedQueue::<Record>::new("metrics_errors", capacity);

        let mut tasks: JoinSet<StageOutput> = JoinSet::new();

        let generator = Generator::new(config.records, config.generator.clone()).with_jitter(jitter_ms);
        tasks.spawn(
            {
                let raw = raw.clone();
                async move { StageOutput::Generated(generator.run(raw).await) }
            }
            .instrument(info_span!(parent: &span, "generator")),
        );

        let validators = ValidatorPool::new(Arc::clone(&self.validation), config.workers)
            .with_jitter(jitter_ms)
            .spawn(&mut tasks, &raw, &valid, &errors);
        let transformers = TransformerPool::new(Arc::clone(&self.transform), config.workers)
            .with_jitter(jitter_ms)
            .spawn(&mut tasks, &valid, &processed, &errors);

        spawn_closer(&mut tasks, &span, vec![validators.clone()], valid.clone());
        spawn_closer(&mut tasks, &span, vec![transformers.clone()], processed.clone());
        spawn_closer(&mut tasks, &span, vec![validators, transformers], errors.clone());

        let processed_split = FanOut::pair(processed, loader_in.clone(), metrics_processed.clone());
        tasks.spawn(
            async move { StageOutput::FannedOut(processed_split.run().await) }
                .instrument(info_span!(parent: &span, "fan_out", upstream = "processed")),
        );
        let error_split = FanOut::pair(errors, error_handler_in.clone(), metrics_errors.clone());
        tasks.spawn(
            async move { StageOutput::FannedOut(error_split.run().await) }
                .instrument(info_span!(parent: &span, "fan_out", upstream = "errors")),
        );

        let loader = JsonLinesSink::new(LOADER, processed_out).with_jitter(jitter_ms);
        tasks.spawn(
            async move {
                StageOutput::Sink {
                    label: LOADER,
                    report: loader.run(loader_in).await,
                }
            }
            .instrument(info_span!(parent: &span, "loader")),
        );
        let error_handler = JsonLinesSink::new(ERROR_HANDLER, failed_out).with_jitter(jitter_ms);
        tasks.spawn(
            async move {
                StageOutput::Sink {
                    label: ERROR_HANDLER,
                    report: error_handler.run(error_handler_in).await,
                }
            }
            .instrument(info_span!(parent: &span, "error_handler")),
        );

        tasks.spawn(
            async move {
                StageOutput::Metrics(
                    MetricsAggregator::new()
                        .run(metrics_processed, metrics_errors)
                        .await,
                )
            }
            .instrument(info_span!(parent: &span, "metrics")),
        );

        let mut records_generated = 0;
        let mut metrics = None;
        let mut loaded = SinkReport::default();
        let mut failed = SinkReport::default();

        while let Some(joined) = tasks.join_next().await {
            let output = match joined {
                Ok(output) => output,
                Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
                Err(err) => panic!("pipeline task cancelled: {err}"),
            };
            match output {
                StageOutput::Generated(count) => records_generated = count,
                StageOutput::Metrics(snapshot) => metrics = Some(snapshot),
                StageOutput::Sink { label: LOADER, report } => loaded = report,
                StageOutput::Sink { report, .. } => failed = report,
                StageOutput::Worker(_) | StageOutput::QueueClosed(_) | StageOutput::FannedOut(_) => {}
            }
        }

        let Some(metrics) = metrics else {
            unreachable!("metrics task exited without reporting");
        };

        let summary = RunSummary {
            run_id,
            records_generated,
            metrics,
            loaded,
            failed,
            elapsed: started.elapsed(),
        };
        info!(
            parent: &span,
            processed = metrics.processed_count,
            errors = metrics.error_count,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "pipeline completed"
        );
        Ok(summary)
    }
}

/// Closes `queue` once every counter in `producers` has reached zero.
fn spawn_closer<T: Send + 'static>(
    tasks: &mut JoinSet<StageOutput>,
    parent: &tracing::Span,
    producers: Vec<CompletionCounter>,
    queue: BoundedQueue<T>,
) {
    let name = queue.name().to_string();
    let span = info_span!(parent: parent, "closer", queue = %name);
    tasks.spawn(
        async move {
            for counter in &producers {
                counter.wait().await;
            }
            queue.close();
            let labels: Vec<_> = producers.iter().map(CompletionCounter::label).collect();
            info!(producers = ?labels, "queue closed after producers finished");
            StageOutput::QueueClosed(name)
        }
        .instrument(span),
    );
}
