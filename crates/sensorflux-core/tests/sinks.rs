use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use anyhow::Result;
use chrono::Utc;
use sensorflux_core::stages::{open_destination, JsonLinesSink, SinkReport};
use sensorflux_core::{BoundedQueue, PipelineError, Record, RecordStatus};
use tokio::io::AsyncWrite;

/// Accepts writes into a shared buffer, failing the calls listed in `fail_on`.
struct FlakyWriter {
    calls: usize,
    fail_on: HashSet<usize>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for FlakyWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let call = self.calls;
        self.calls += 1;
        if self.fail_on.contains(&call) {
            return Poll::Ready(Err(io::Error::other("disk full")));
        }
        self.written.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn failed(index: usize) -> Record {
    Record::raw(format!("rec-{index:04}"), Utc::now(), "sensor-3", -1.0, "Celsius", "Room-3")
        .reject(RecordStatus::Invalid, "Value out of expected range (0-1000)")
}

#[tokio::test]
async fn write_failures_drop_the_item_and_the_sink_keeps_going() -> Result<()> {
    let written = Arc::new(Mutex::new(Vec::new()));
    let writer = FlakyWriter {
        calls: 0,
        fail_on: HashSet::from([1, 3]),
        written: Arc::clone(&written),
    };

    let queue = BoundedQueue::new("error_handler", 8);
    for i in 0..5 {
        queue.put(failed(i)).await;
    }
    queue.close();

    let report = JsonLinesSink::new("error_handler", writer).run(queue).await;
    assert_eq!(report, SinkReport { written: 3, dropped: 2 });

    let bytes = written.lock().unwrap().clone();
    let ids: Vec<String> = String::from_utf8(bytes)?
        .lines()
        .map(|line| serde_json::from_str::<Record>(line).map(|r| r.id))
        .collect::<Result<_, _>>()?;
    assert_eq!(ids, vec!["rec-0000", "rec-0002", "rec-0004"]);
    Ok(())
}

#[tokio::test]
async fn failed_records_are_written_with_their_error() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("failed_data.jsonl");
    std::fs::write(&path, "stale line from a previous run\n")?;

    let writer = open_destination(&path).await?;
    let queue = BoundedQueue::new("error_handler", 2);
    queue.put(failed(7)).await;
    queue.close();

    let report = JsonLinesSink::new("error_handler", writer).run(queue).await;
    assert_eq!(report.written, 1);

    let content = std::fs::read_to_string(&path)?;
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), 1, "destination was not truncated");

    let value: serde_json::Value = serde_json::from_str(lines[0])?;
    let object = value.as_object().expect("json object");
    let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        vec!["error", "id", "location", "sensor_id", "status", "timestamp", "unit", "value"]
    );
    assert_eq!(object["status"], "invalid");
    Ok(())
}

#[tokio::test]
async fn unreachable_destination_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("processed_data.jsonl");

    match open_destination(&path).await {
        Err(PipelineError::Destination { path: reported, .. }) => assert_eq!(reported, path),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("opening {} should fail", path.display()),
    }
}
