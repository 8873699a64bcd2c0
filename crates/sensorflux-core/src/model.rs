use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Raw,
    Invalid,
    Valid,
    TransformationError,
    Processed,
}

impl RecordStatus {
    pub fn is_failure(self) -> bool {
        matches!(self, RecordStatus::Invalid | RecordStatus::TransformationError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Raw => "raw",
            RecordStatus::Invalid => "invalid",
            RecordStatus::Valid => "valid",
            RecordStatus::TransformationError => "transformation_error",
            RecordStatus::Processed => "processed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single sensor reading as it moves through the pipeline.
///
/// `error` is populated exactly when `status` is a failure state. Use the
/// transition methods rather than assigning `status` directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub value: f64,
    pub unit: String,
    pub location: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Record {
    pub fn raw(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        sensor_id: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            sensor_id: sensor_id.into(),
            value,
            unit: unit.into(),
            location: location.into(),
            status: RecordStatus::Raw,
            error: None,
        }
    }

    /// Moves the record into a non-failure state, clearing any error.
    pub fn advance(mut self, status: RecordStatus) -> Self {
        assert!(
            !status.is_failure(),
            "advance() called with failure status {status}"
        );
        self.status = status;
        self.error = None;
        self
    }

    /// Moves the record into a failure state with the given reason.
    pub fn reject(mut self, status: RecordStatus, reason: impl Into<String>) -> Self {
        assert!(
            status.is_failure(),
            "reject() called with non-failure status {status}"
        );
        self.status = status;
        self.error = Some(reason.into());
        self
    }

    pub fn is_consistent(&self) -> bool {
        self.status.is_failure() == self.error.is_some()
    }
}

/// A record that passed transformation, with its derived anomaly assessment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedRecord {
    #[serde(flatten)]
    pub record: Record,
    pub processed_at: DateTime<Utc>,
    pub anomaly_score: f64,
    pub is_anomaly: bool,
}

impl ProcessedRecord {
    pub fn new(record: Record, assessment: Assessment, processed_at: DateTime<Utc>) -> Self {
        Self {
            record: record.advance(RecordStatus::Processed),
            processed_at,
            anomaly_score: assessment.score,
            is_anomaly: assessment.is_anomaly,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn value(&self) -> f64 {
        self.record.value
    }
}

/// Output of a transform rule for an eligible record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub score: f64,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub processed_count: u64,
    pub error_count: u64,
    pub anomaly_count: u64,
    pub total_value: f64,
}

impl MetricsSnapshot {
    pub fn total(&self) -> u64 {
        self.processed_count + self.error_count
    }
}
