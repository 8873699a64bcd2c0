use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{PipelineError, Result};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Everything needed to run one pipeline.
///
/// Values are layered: defaults, then an optional TOML file, then
/// `SENSORFLUX_*` environment variables. The CLI applies its flags last.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub records: usize,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Upper bound, in milliseconds, of the random pause taken after each
    /// record in the generator, worker and sink stages. Zero disables it.
    pub stage_jitter_ms: u64,
    pub generator: GeneratorConfig,
    pub validation: ValidationConfig,
    pub transform: TransformConfig,
    pub output: OutputConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            records: 1000,
            workers: 5,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            stage_jitter_ms: 0,
            generator: GeneratorConfig::default(),
            validation: ValidationConfig::default(),
            transform: TransformConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    pub seed: Option<u64>,
    pub sensors: u32,
    pub locations: u32,
    pub min_value: f64,
    pub max_value: f64,
    pub unit: String,
    /// Every n-th record gets an out-of-range value. Zero disables it.
    pub invalid_value_every: usize,
    /// Every n-th record gets an unsupported unit. Zero disables it.
    pub invalid_unit_every: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: None,
            sensors: 5,
            locations: 3,
            min_value: 10.0,
            max_value: 110.0,
            unit: "Celsius".to_string(),
            invalid_value_every: 10,
            invalid_unit_every: 11,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    pub min_value: f64,
    pub max_value: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_value: 0.0,
            max_value: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TransformConfig {
    pub score_factor: f64,
    pub anomaly_threshold: f64,
    pub unsupported_units: Vec<String>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            score_factor: 0.1,
            anomaly_threshold: 8.0,
            unsupported_units: vec!["INVALID_UNIT".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub processed_path: PathBuf,
    pub failed_path: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            processed_path: PathBuf::from("processed_data.jsonl"),
            failed_path: PathBuf::from("failed_data.jsonl"),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|source| PipelineError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads the file if given (defaults otherwise) and applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(records) = env_parse("SENSORFLUX_RECORDS")? {
            self.records = records;
        }
        if let Some(workers) = env_parse("SENSORFLUX_WORKERS")? {
            self.workers = workers;
        }
        if let Some(capacity) = env_parse("SENSORFLUX_QUEUE_CAPACITY")? {
            self.queue_capacity = capacity;
        }
        if let Some(seed) = env_parse("SENSORFLUX_SEED")? {
            self.generator.seed = Some(seed);
        }
        if let Ok(path) = env::var("SENSORFLUX_PROCESSED_OUTPUT") {
            self.output.processed_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("SENSORFLUX_FAILED_OUTPUT") {
            self.output.failed_path = PathBuf::from(path);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PipelineError::Config("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::Config(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.validation.min_value.is_nan() || self.validation.max_value.is_nan() {
            return Err(PipelineError::Config(
                "validation bounds must be numbers, not NaN".into(),
            ));
        }
        if self.validation.min_value > self.validation.max_value {
            return Err(PipelineError::Config(format!(
                "validation range is inverted ({} > {})",
                self.validation.min_value, self.validation.max_value
            )));
        }
        let (low, high) = (self.generator.min_value, self.generator.max_value);
        if !low.is_finite() || !high.is_finite() || !(high - low).is_finite() {
            return Err(PipelineError::Config(format!(
                "generator value range must be finite ({low}..{high})"
            )));
        }
        if self.generator.min_value >= self.generator.max_value {
            return Err(PipelineError::Config(format!(
                "generator value range is empty ({} >= {})",
                self.generator.min_value, self.generator.max_value
            )));
        }
        if self.generator.sensors == 0 || self.generator.locations == 0 {
            return Err(PipelineError::Config(
                "generator needs at least one sensor and one location".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| PipelineError::Config(format!("{key}={raw:?}: {err}"))),
        Err(_) => Ok(None),
    }
}
