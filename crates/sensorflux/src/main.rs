use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use sensorflux_core::{Pipeline, PipelineConfig, RunSummary};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run the sensorflux record pipeline", long_about = None)]
struct Cli {
    /// Number of records to generate
    #[arg(short = 'n', long)]
    records: Option<usize>,
    /// Workers in each of the validator and transformer pools
    #[arg(short, long)]
    workers: Option<usize>,
    /// Capacity of every queue between stages
    #[arg(long)]
    queue_capacity: Option<usize>,
    /// Destination for processed records (JSON lines)
    #[arg(long)]
    processed_output: Option<PathBuf>,
    /// Destination for failed records (JSON lines)
    #[arg(long)]
    failed_output: Option<PathBuf>,
    /// Seed for the record generator
    #[arg(long)]
    seed: Option<u64>,
    /// Maximum random pause per record in each stage, in milliseconds
    #[arg(long)]
    stage_jitter_ms: Option<u64>,
    /// TOML file with pipeline settings
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config.as_deref())
            .context("failed to load pipeline configuration")?;

        if let Some(records) = self.records {
            config.records = records;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(path) = self.processed_output {
            config.output.processed_path = path;
        }
        if let Some(path) = self.failed_output {
            config.output.failed_path = path;
        }
        if let Some(seed) = self.seed {
            config.generator.seed = Some(seed);
        }
        if let Some(jitter) = self.stage_jitter_ms {
            config.stage_jitter_ms = jitter;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = Cli::parse().into_config()?;
    info!(
        records = config.records,
        workers = config.workers,
        processed_output = %config.output.processed_path.display(),
        failed_output = %config.output.failed_path.display(),
        "starting pipeline"
    );

    let summary = Pipeline::new(config)
        .run()
        .await
        .context("pipeline aborted before processing")?;

    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let metrics = &summary.metrics;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Metric", "Value"]);
    table.add_row(vec![Cell::new("Records generated"), Cell::new(summary.records_generated)]);
    table.add_row(vec![Cell::new("Processed"), Cell::new(metrics.processed_count)]);
    table.add_row(vec![Cell::new("Errors"), Cell::new(metrics.error_count)]);
    table.add_row(vec![Cell::new("Anomalies"), Cell::new(metrics.anomaly_count)]);
    table.add_row(vec![
        Cell::new("Total value"),
        Cell::new(format!("{:.2}", metrics.total_value)),
    ]);
    table.add_row(vec![
        Cell::new("Loader written / dropped"),
        Cell::new(format!("{} / {}", summary.loaded.written, summary.loaded.dropped)),
    ]);
    table.add_row(vec![
        Cell::new("Error handler written / dropped"),
        Cell::new(format!("{} / {}", summary.failed.written, summary.failed.dropped)),
    ]);
    table.add_row(vec![
        Cell::new("Elapsed"),
        Cell::new(format!("{} ms", summary.elapsed.as_millis())),
    ]);

    println!("\n--- Pipeline Summary (run {}) ---", summary.run_id);
    println!("{table}");
}
