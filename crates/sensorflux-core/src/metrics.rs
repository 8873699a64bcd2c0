//! Outcome statistics gathered from the metrics side of the fan-out.

use tracing::{debug, info};

use crate::model::{MetricsSnapshot, ProcessedRecord, Record};
use crate::mux::{Multiplexer, Signal};
use crate::queue::BoundedQueue;

pub const PROCESSED_SOURCE: &str = "processed";
pub const ERROR_SOURCE: &str = "errors";

#[derive(Debug)]
pub enum Observation {
    Processed(ProcessedRecord),
    Failed(Record),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    BothOpen,
    OneClosed,
    Terminal,
}

/// Sole owner of the run's counters.
///
/// Consumes itself in [`run`](Self::run) so nothing else can read the
/// counters while they are still moving; callers only see the final snapshot.
#[derive(Debug)]
pub struct MetricsAggregator {
    snapshot: MetricsSnapshot,
    state: AggregatorState,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            snapshot: MetricsSnapshot::default(),
            state: AggregatorState::BothOpen,
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    fn observe(&mut self, observation: Observation) {
        match observation {
            Observation::Processed(record) => {
                self.snapshot.processed_count += 1;
                self.snapshot.total_value += record.value();
                if record.is_anomaly {
                    self.snapshot.anomaly_count += 1;
                }
                debug!(record_id = %record.id(), "counted processed record");
            }
            Observation::Failed(record) => {
                self.snapshot.error_count += 1;
                debug!(record_id = %record.id, "counted failed record");
            }
        }
    }

    fn source_closed(&mut self, source: &'static str, still_open: usize) {
        self.state = match still_open {
            0 => AggregatorState::Terminal,
            1 => AggregatorState::OneClosed,
            _ => AggregatorState::BothOpen,
        };
        debug!(source, state = ?self.state, "metrics source closed");
    }

    /// Counts until both queues are closed and drained, then returns the snapshot.
    pub async fn run(
        mut self,
        processed: BoundedQueue<ProcessedRecord>,
        errors: BoundedQueue<Record>,
    ) -> MetricsSnapshot {
        let mut sources = Multiplexer::new();
        sources.attach(PROCESSED_SOURCE, processed, Observation::Processed);
        sources.attach(ERROR_SOURCE, errors, Observation::Failed);

        while let Some(signal) = sources.next().await {
            match signal {
                Signal::Item(observation) => self.observe(observation),
                Signal::Closed(source) => self.source_closed(source, sources.open_sources()),
            }
        }
        debug_assert_eq!(self.state, AggregatorState::Terminal);

        let snapshot = self.snapshot;
        info!(
            processed = snapshot.processed_count,
            errors = snapshot.error_count,
            anomalies = snapshot.anomaly_count,
            total_value = snapshot.total_value,
            "metrics collection finished"
        );
        snapshot
    }
}
