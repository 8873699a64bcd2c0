//! Pluggable business rules applied by the validator and transformer pools.
//!
//! Rules are pure: they only look at the borrowed record and never do I/O.
//! The worker pools own the status transitions and routing.

use crate::config::{TransformConfig, ValidationConfig};
use crate::error::RuleViolation;
use crate::model::{Assessment, Record};

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn check(&self, record: &Record) -> Result<(), RuleViolation>;
}

pub trait TransformRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn assess(&self, record: &Record) -> Result<Assessment, RuleViolation>;
}

/// Accepts values inside an inclusive range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeRule {
    pub min: f64,
    pub max: f64,
}

impl RangeRule {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl Default for RangeRule {
    fn default() -> Self {
        Self::from(&ValidationConfig::default())
    }
}

impl From<&ValidationConfig> for RangeRule {
    fn from(config: &ValidationConfig) -> Self {
        Self::new(config.min_value, config.max_value)
    }
}

impl ValidationRule for RangeRule {
    fn name(&self) -> &'static str {
        "range"
    }

    fn check(&self, record: &Record) -> Result<(), RuleViolation> {
        // NaN fails both comparisons, so test for inclusion rather than exclusion.
        if record.value >= self.min && record.value <= self.max {
            Ok(())
        } else {
            Err(RuleViolation::new(
                self.name(),
                format!(
                    "Value out of expected range ({}-{})",
                    self.min, self.max
                ),
            ))
        }
    }
}

/// Scores a record as `value * factor` and flags it above `threshold`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyScorer {
    pub factor: f64,
    pub threshold: f64,
    pub unsupported_units: Vec<String>,
}

impl Default for AnomalyScorer {
    fn default() -> Self {
        Self::from(&TransformConfig::default())
    }
}

impl From<&TransformConfig> for AnomalyScorer {
    fn from(config: &TransformConfig) -> Self {
        Self {
            factor: config.score_factor,
            threshold: config.anomaly_threshold,
            unsupported_units: config.unsupported_units.clone(),
        }
    }
}

impl AnomalyScorer {
    pub fn score(&self, value: f64) -> Assessment {
        let score = value * self.factor;
        Assessment {
            score,
            is_anomaly: score > self.threshold,
        }
    }
}

impl TransformRule for AnomalyScorer {
    fn name(&self) -> &'static str {
        "anomaly_score"
    }

    fn assess(&self, record: &Record) -> Result<Assessment, RuleViolation> {
        if self.unsupported_units.iter().any(|unit| unit == &record.unit) {
            return Err(RuleViolation::new(
                self.name(),
                "Invalid unit for transformation",
            ));
        }
        Ok(self.score(record.value))
    }
}
