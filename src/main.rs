//! Staking Era Exporter CLI
//!
//! Writes per-era validator statistics for a Substrate relay chain to CSV.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use staking_era_exporter::config::ExporterConfig;
use staking_era_exporter::pipeline;

#[derive(Parser)]
#[command(name = "staking-era-exporter")]
#[command(version)]
#[command(about = "Export per-era validator staking stats to CSV", long_about = None)]
struct Cli {
    /// The chain to analyze (e.g. kusama, polkadot)
    #[arg(short, long)]
    chain: String,

    /// Number of most recent completed eras to analyze
    #[arg(short, long)]
    number: u32,

    /// Path to configuration file (optional, uses built-in networks if not provided)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory for CSV reports
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => ExporterConfig::load(),
    };

    if let Some(dir) = cli.output_dir {
        config.export_dir = dir;
    }
    config.validate().context("Invalid configuration")?;

    info!("=== Exporting {} eras of {} ===", cli.number, cli.chain);

    let metadata = pipeline::run(&config, &cli.chain, cli.number)
        .await
        .with_context(|| format!("Export for {} failed", cli.chain))?;

    info!(
        "Wrote {} eras ({} validator rows) to {:?}",
        metadata.record_counts.eras_written, metadata.record_counts.validator_rows, config.export_dir
    );
    for path in pipeline::written_files(&config, &metadata) {
        info!("  {}", path.display());
    }

    Ok(())
}
