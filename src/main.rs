//! flurry: streams hourly JSON application logs into InfluxDB.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use flurry::config::Config;
use flurry::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use flurry::metrics;
use flurry::pipeline::{self, RunOptions, cancel_on_signal};

/// Log files to time-series metrics.
#[derive(Parser, Debug)]
#[command(name = "flurry")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Number of files processed concurrently (overrides the config).
    #[arg(short, long)]
    processes: Option<usize>,

    /// Directory or URL holding the processing state (overrides the config).
    #[arg(short, long)]
    data_path: Option<String>,

    /// Drop state of fully processed hour folders, then exit.
    #[arg(long)]
    clean: bool,

    /// Process files one at a time in the control loop.
    #[arg(long)]
    debug: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("flurry starting");

    let config = build_config(&args)?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        for (name, source) in &config.sources {
            info!(source = %name, path = %source.path, "Source");
        }
        info!(url = %config.sink.url, database = %config.sink.database, "Sink");
        info!(path = %config.state.path, "State");
        info!(
            max_concurrent_files = config.processing.max_concurrent_files,
            poll_interval_secs = config.processing.poll_interval_secs,
            max_batch_size = config.sink.max_batch_size,
            "Processing"
        );
        info!("Configuration is valid");
        return Ok(());
    }

    if args.clean {
        let pruned = pipeline::clean(&config).await?;
        info!(folders = pruned, "Clean complete");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr, shutdown.clone()).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    let options = RunOptions { inline: args.debug };
    let stats = pipeline::run_pipeline(config, options, shutdown.clone()).await?;
    shutdown.cancel();

    info!("Pipeline stopped");
    info!("  Files processed: {}", stats.files_processed);
    info!("  Files failed: {}", stats.files_failed);
    info!("  Lines read: {}", stats.lines);
    info!("  Records written: {}", stats.records_written);
    info!("  Malformed lines: {}", stats.malformed_lines);

    Ok(())
}

/// Load the configuration file and apply command-line overrides.
fn build_config(args: &Args) -> Result<Config, PipelineError> {
    let mut config = Config::from_file(&args.config).context(ConfigSnafu)?;
    config.apply_overrides(args.processes, args.data_path.clone());
    config.validate().context(ConfigSnafu)?;
    Ok(config)
}
