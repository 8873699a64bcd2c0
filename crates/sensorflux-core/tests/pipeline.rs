use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use sensorflux_core::config::{GeneratorConfig, OutputConfig};
use sensorflux_core::error::RuleViolation;
use sensorflux_core::model::Assessment;
use sensorflux_core::rules::{AnomalyScorer, RangeRule, TransformRule, ValidationRule};
use sensorflux_core::{Pipeline, PipelineConfig, PipelineError, ProcessedRecord, Record, RecordStatus};
use tempfile::TempDir;

fn config_in(dir: &TempDir, records: usize, workers: usize) -> PipelineConfig {
    PipelineConfig {
        records,
        workers,
        queue_capacity: 4,
        generator: GeneratorConfig {
            seed: Some(42),
            ..GeneratorConfig::default()
        },
        output: OutputConfig {
            processed_path: dir.path().join("processed_data.jsonl"),
            failed_path: dir.path().join("failed_data.jsonl"),
        },
        ..PipelineConfig::default()
    }
}

fn read_lines<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .map(|line| serde_json::from_str(line).map_err(anyhow::Error::from))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fifty_records_split_into_nine_failures_and_forty_one_successes() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_in(&dir, 50, 3);
    let summary = Pipeline::new(config.clone()).run().await?;

    assert_eq!(summary.records_generated, 50);
    assert_eq!(summary.metrics.error_count, 9);
    assert_eq!(summary.metrics.processed_count, 41);
    assert!(summary.metrics.anomaly_count >= 1);

    let failed: Vec<Record> = read_lines(&config.output.failed_path)?;
    let mut failed_ids: Vec<_> = failed.iter().map(|r| r.id.clone()).collect();
    failed_ids.sort();
    let mut expected: Vec<_> = [0, 10, 11, 20, 22, 30, 33, 40, 44]
        .iter()
        .map(|i| format!("rec-{i:04}"))
        .collect();
    expected.sort();
    assert_eq!(failed_ids, expected);

    let statuses: HashSet<_> = failed.iter().map(|r| (r.id.as_str(), r.status)).collect();
    assert!(statuses.contains(&("rec-0000", RecordStatus::Invalid)));
    assert!(statuses.contains(&("rec-0011", RecordStatus::TransformationError)));
    assert!(failed.iter().all(Record::is_consistent));

    let processed: Vec<ProcessedRecord> = read_lines(&config.output.processed_path)?;
    assert_eq!(processed.len(), 41);
    assert!(processed.iter().any(|r| r.is_anomaly));
    assert!(processed
        .iter()
        .all(|r| r.record.status == RecordStatus::Processed && r.record.error.is_none()));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_generated_record_ends_up_in_exactly_one_sink() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config_in(&dir, 2000, 5);
    config.queue_capacity = 2;
    let summary = Pipeline::new(config.clone()).run().await?;

    let metrics = summary.metrics;
    assert_eq!(metrics.total(), 2000);
    assert_eq!(summary.loaded.written, metrics.processed_count);
    assert_eq!(summary.failed.written, metrics.error_count);
    assert_eq!(summary.loaded.dropped + summary.failed.dropped, 0);

    let processed: Vec<ProcessedRecord> = read_lines(&config.output.processed_path)?;
    let failed: Vec<Record> = read_lines(&config.output.failed_path)?;

    let mut ids = HashSet::new();
    for id in processed.iter().map(|r| r.id()).chain(failed.iter().map(|r| r.id.as_str())) {
        assert!(ids.insert(id.to_string()), "{id} written twice");
    }
    assert_eq!(ids.len(), 2000);

    // The metrics path saw exactly what the sink path wrote.
    let sink_total: f64 = processed.iter().map(ProcessedRecord::value).sum();
    assert!((sink_total - metrics.total_value).abs() < 1e-6);
    let sink_anomalies = processed.iter().filter(|r| r.is_anomaly).count() as u64;
    assert_eq!(sink_anomalies, metrics.anomaly_count);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn emitted_records_reclassify_to_their_recorded_status() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_in(&dir, 120, 4);
    Pipeline::new(config.clone()).run().await?;

    let range = RangeRule::from(&config.validation);
    let scorer = AnomalyScorer::from(&config.transform);

    for record in read_lines::<Record>(&config.output.failed_path)? {
        let status = match range.check(&record) {
            Err(_) => RecordStatus::Invalid,
            Ok(()) if scorer.assess(&record).is_err() => RecordStatus::TransformationError,
            Ok(()) => RecordStatus::Processed,
        };
        assert_eq!(status, record.status, "{} reclassified differently", record.id);
    }

    for processed in read_lines::<ProcessedRecord>(&config.output.processed_path)? {
        assert!(range.check(&processed.record).is_ok());
        let assessment = scorer.assess(&processed.record)?;
        assert_eq!(assessment.is_anomaly, processed.is_anomaly);
        assert!((assessment.score - processed.anomaly_score).abs() < 1e-9);
    }
    Ok(())
}

#[tokio::test]
async fn unopenable_destination_aborts_before_any_work() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config_in(&dir, 10, 2);
    config.output.failed_path = dir.path().join("no-such-dir").join("failed.jsonl");

    let err = Pipeline::new(config.clone()).run().await.unwrap_err();
    assert!(matches!(err, PipelineError::Destination { .. }), "got {err}");

    // The processed destination was opened first, but nothing reached it.
    let processed = std::fs::read_to_string(&config.output.processed_path)?;
    assert!(processed.is_empty());
    Ok(())
}

#[tokio::test]
async fn invalid_configuration_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_in(&dir, 10, 0);
    let err = Pipeline::new(config).run().await.unwrap_err();
    assert!(matches!(err, PipelineError::Config(_)));
    Ok(())
}

struct EvenSensorsOnly;

impl ValidationRule for EvenSensorsOnly {
    fn name(&self) -> &'static str {
        "even_sensors"
    }

    fn check(&self, record: &Record) -> Result<(), RuleViolation> {
        let digit = record.sensor_id.trim_start_matches("sensor-");
        match digit.parse::<u32>() {
            Ok(n) if n % 2 == 0 => Ok(()),
            _ => Err(RuleViolation::new(self.name(), "odd sensor")),
        }
    }
}

struct FlagEverything;

impl TransformRule for FlagEverything {
    fn name(&self) -> &'static str {
        "flag_everything"
    }

    fn assess(&self, record: &Record) -> Result<Assessment, RuleViolation> {
        Ok(Assessment {
            score: record.value,
            is_anomaly: true,
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn custom_rules_plug_into_the_pools() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = config_in(&dir, 200, 2);
    let summary = Pipeline::new(config.clone())
        .with_validation_rule(EvenSensorsOnly)
        .with_transform_rule(FlagEverything)
        .run()
        .await?;

    assert_eq!(summary.metrics.total(), 200);
    assert_eq!(summary.metrics.anomaly_count, summary.metrics.processed_count);

    for record in read_lines::<Record>(&config.output.failed_path)? {
        assert_eq!(record.status, RecordStatus::Invalid);
        assert_eq!(record.error.as_deref(), Some("odd sensor"));
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn jittered_run_still_conserves_records() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = config_in(&dir, 60, 3);
    config.stage_jitter_ms = 3;
    let summary = Pipeline::new(config).run().await?;
    assert_eq!(summary.metrics.total(), 60);
    Ok(())
}

struct PanicsOnFifth;

impl ValidationRule for PanicsOnFifth {
    fn name(&self) -> &'static str {
        "panics_on_fifth"
    }

    fn check(&self, record: &Record) -> Result<(), RuleViolation> {
        if record.id == "rec-0005" {
            panic!("rule blew up on {}", record.id);
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[should_panic(expected = "rule blew up on rec-0005")]
async fn panicking_stage_is_re_raised_by_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir, 40, 3);
    let run = Pipeline::new(config)
        .with_validation_rule(PanicsOnFifth)
        .run();

    match tokio::time::timeout(std::time::Duration::from_secs(10), run).await {
        Ok(result) => panic!("run returned instead of panicking: {result:?}"),
        Err(_) => panic!("run hung after a stage panicked"),
    }
}
