use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, info_span, Instrument};

use crate::completion::CompletionCounter;
use crate::model::{Record, RecordStatus};
use crate::queue::BoundedQueue;
use crate::rules::ValidationRule;

use super::{pause, WorkerReport};

pub const STAGE: &str = "validator";

/// N workers sharing one input queue, splitting records into valid and invalid.
#[derive(Clone)]
pub struct ValidatorPool {
    rule: Arc<dyn ValidationRule>,
    workers: usize,
    jitter_ms: u64,
}

impl ValidatorPool {
    pub fn new(rule: Arc<dyn ValidationRule>, workers: usize) -> Self {
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

    /// Launches every worker into `tasks`.
    ///
    /// The returned counter reaches zero once all workers have exited; the
    /// caller decides which queues to close on that signal.
    pub fn spawn<O>(
        &self,
        tasks: &mut JoinSet<O>,
        input: &BoundedQueue<Record>,
        valid: &BoundedQueue<Record>,
        errors: &BoundedQueue<Record>,
    ) -> CompletionCounter
    where
        O: From<WorkerReport> + Send + 'static,
    {
        let counter = CompletionCounter::new(STAGE, self.workers);

        for worker in 0..self.workers {
            let guard = counter.guard();
            let rule = Arc::clone(&self.rule);
            let (input, valid, errors) = (input.clone(), valid.clone(), errors.clone());
            let jitter_ms = self.jitter_ms;

            tasks.spawn(
                async move {
                    let report =
                        validate_worker(worker, rule.as_ref(), input, valid, errors, jitter_ms)
                            .await;
                    drop(guard);
                    O::from(report)
                }
                .instrument(info_span!("validator", worker)),
            );
        }

        counter
    }
}

pub async fn validate_worker(
    worker: usize,
    rule: &dyn ValidationRule,
    input: BoundedQueue<Record>,
    valid: BoundedQueue<Record>,
    errors: BoundedQueue<Record>,
    jitter_ms: u64,
) -> WorkerReport {
    let mut report = WorkerReport {
        stage: STAGE,
        worker,
        ..WorkerReport::default()
    };

    while let Some(record) = input.get().await {
        match rule.check(&record) {
            Ok(()) => {
                debug!(record_id = %record.id, "record valid");
                valid.put(record.advance(RecordStatus::Valid)).await;
                report.accepted += 1;
            }
            Err(violation) => {
                debug!(record_id = %record.id, value = record.value, %violation, "record invalid");
                errors
                    .put(record.reject(RecordStatus::Invalid, violation.message))
                    .await;
                report.rejected += 1;
            }
        }
        pause(jitter_ms).await;
    }

    info!(
        accepted = report.accepted,
        rejected = report.rejected,
        "validator worker finished"
    );
    report
}
