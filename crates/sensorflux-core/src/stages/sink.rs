//! Terminal consumers writing one JSON document per line.

use std::path::Path;

use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result, SinkError};
use crate::model::{ProcessedRecord, Record};
use crate::queue::BoundedQueue;

use super::pause;

/// Best-effort tally of what a sink managed to write.
///
/// Not reconciled against the metrics snapshot: a dropped item is still
/// counted by the aggregator.
///
/// The split between `written` and `dropped` is approximate. Lines go through
/// a buffer, so a failed write usually means an earlier buffered line could
/// not be flushed. That line stays buffered and is retried, while the item
/// being written at the time is the one counted as dropped.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct SinkReport {
    pub written: u64,
    pub dropped: u64,
}

/// Items a sink knows how to describe in its logs.
pub trait SinkItem: Serialize + Send + 'static {
    fn record(&self) -> &Record;

    fn log_written(&self, sink: &'static str) {
        debug!(sink, record_id = %self.record().id, "record written");
    }
}

impl SinkItem for Record {
    fn record(&self) -> &Record {
        self
    }

    fn log_written(&self, sink: &'static str) {
        debug!(
            sink,
            record_id = %self.id,
            status = %self.status,
            reason = self.error.as_deref().unwrap_or_default(),
            "record failed permanently"
        );
    }
}

impl SinkItem for ProcessedRecord {
    fn record(&self) -> &Record {
        &self.record
    }

    fn log_written(&self, sink: &'static str) {
        debug!(
            sink,
            record_id = %self.record.id,
            is_anomaly = self.is_anomaly,
            "record loaded"
        );
    }
}

/// Opens `path` in truncate-create mode behind a write buffer.
pub async fn open_destination(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|source| PipelineError::Destination {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(BufWriter::new(file))
}

/// Drains a queue into a writer, one JSON line per item.
///
/// A failed item is logged and skipped; the sink keeps going.
pub struct JsonLinesSink<W> {
    label: &'static str,
    writer: W,
    jitter_ms: u64,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(label: &'static str, writer: W) -> Self {
        Self {
            label,
            writer,
            jitter_ms: 0,
        }
    }

    pub fn with_jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub async fn run<T: SinkItem>(mut self, input: BoundedQueue<T>) -> SinkReport {
        info!(sink = self.label, "sink started");
        let mut report = SinkReport::default();

        while let Some(item) = input.get().await {
            match write_line(&mut self.writer, &item).await {
                Ok(()) => {
                    item.log_written(self.label);
                    report.written += 1;
                }
                Err(err) => {
                    warn!(
                        sink = self.label,
                        record_id = %item.record().id,
                        error = %err,
                        "dropping record"
                    );
                    report.dropped += 1;
                }
            }
            pause(self.jitter_ms).await;
        }

        if let Err(err) = self.writer.flush().await {
            warn!(sink = self.label, error = %err, "final flush failed; buffered lines may be lost");
        }

        info!(
            sink = self.label,
            written = report.written,
            dropped = report.dropped,
            "sink finished"
        );
        report
    }
}

async fn write_line<W, T>(writer: &mut W, item: &T) -> std::result::Result<(), SinkError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(item)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}
