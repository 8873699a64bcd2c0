use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, Instrument};

use crate::completion::CompletionCounter;
use crate::model::{ProcessedRecord, Record, RecordStatus};
use crate::queue::BoundedQueue;
use crate::rules::TransformRule;

use super::{pause, WorkerReport};

pub const STAGE: &str = "transformer";

/// N workers turning valid records into processed ones.
///
/// Records the rule refuses go to the shared error queue as
/// `transformation_error` and are not retried.
#[derive(Clone)]
pub struct TransformerPool {
    rule: Arc<dyn TransformRule>,
    workers: usize,
    jitter_ms: u64,
}

impl TransformerPool {
    pub fn new(rule: Arc<dyn TransformRule>, workers: usize) -> Self {
        Self {
            rule,
            workers,
            jitter_ms: 0,
        }
    }

    pub fn with_jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn spawn<O>(
        &self,
        tasks: &mut JoinSet<O>,
        input: &BoundedQueue<Record>,
        processed: &BoundedQueue<ProcessedRecord>,
        errors: &BoundedQueue<Record>,
    ) -> CompletionCounter
    where
        O: From<WorkerReport> + Send + 'static,
    {
        let counter = CompletionCounter::new(STAGE, self.workers);

        for worker in 0..self.workers {
            let guard = counter.guard();
            let rule = Arc::clone(&self.rule);
            let (input, processed, errors) = (input.clone(), processed.clone(), errors.clone());
            let jitter_ms = self.jitter_ms;

            tasks.spawn(
                async move {
                    let report = transform_worker(
                        worker,
                        rule.as_ref(),
                        input,
                        processed,
                        errors,
                        jitter_ms,
                    )
                    .await;
                    drop(guard);
                    O::from(report)
                }
                .instrument(info_span!("transformer", worker)),
            );
        }

        counter
    }
}

pub async fn transform_worker(
    worker: usize,
    rule: &dyn TransformRule,
    input: BoundedQueue<Record>,
    processed: BoundedQueue<ProcessedRecord>,
    errors: BoundedQueue<Record>,
    jitter_ms: u64,
) -> WorkerReport {
    let mut report = WorkerReport {
        stage: STAGE,
        worker,
        ..WorkerReport::default()
    };

    while let Some(record) = input.get().await {
        match rule.assess(&record) {
            Ok(assessment) => {
                debug!(
                    record_id = %record.id,
                    anomaly_score = assessment.score,
                    is_anomaly = assessment.is_anomaly,
                    "record transformed"
                );
                processed
                    .put(ProcessedRecord::new(record, assessment, Utc::now()))
                    .await;
                report.accepted += 1;
            }
            Err(violation) => {
                debug!(record_id = %record.id, unit = %record.unit, %violation, "transformation failed");
                errors
                    .put(record.reject(RecordStatus::TransformationError, violation.message))
                    .await;
                report.rejected += 1;
            }
        }
        pause(jitter_ms).await;
    }

    info!(
        accepted = report.accepted,
        rejected = report.rejected,
        "transformer worker finished"
    );
    report
}
