//! segsync: A standalone tool that reconciles newly observed email
//! domains from object-store exports into a feature-flag segment rule.
//!
//! One invocation performs one catch-up run: it derives the last
//! processed watermark from the remote rule, scans the export bucket's
//! date partitions for newer manifests, extracts domains from the
//! referenced gzip CSV files, and PATCHes the merged result back.

mod config;
mod error;
mod extract;
mod manifest;
mod merge;
mod metrics;
mod notify;
mod pipeline;
mod segment;
mod storage;
mod watermark;

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, RunError};
use pipeline::run_reconciliation;

/// Email-domain segment reconciliation job.
#[derive(Parser, Debug)]
#[command(name = "segsync")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), RunError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("segsync starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    // Initialize metrics if enabled
    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
        debug!(
            "Metrics endpoint listening on http://{}/metrics",
            config.metrics.address
        );
    }

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Source bucket: {}", config.source.bucket_url);
        info!(
            "Segment: {}/{}/{} at {}",
            config.segment.project,
            config.segment.environment,
            config.segment.key,
            config.segment.base_url
        );
        info!("Fallback date: {}", config.watermark.fallback_date);
        info!("Patch value limit: {}", config.segment.patch_value_limit);
        info!("Configuration is valid");
        return Ok(());
    }

    // Run the reconciliation
    let stats = run_reconciliation(config).await?;

    info!("Reconciliation completed successfully");
    info!("  Manifests processed: {}", stats.manifests);
    info!("  Data files: {}", stats.data_files);
    info!("  Data files skipped: {}", stats.files_skipped);
    info!("  New domains: {}", stats.new_domains);
    info!("  Patch operations: {}", stats.patch_operations);
    info!("  Watermark: {}", stats.watermark);

    Ok(())
}
