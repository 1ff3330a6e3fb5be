//! Reconciliation driver.
//!
//! Sequences one run: read the segment, derive the watermark, scan the
//! day range, resolve manifests, extract domains, merge, write back,
//! and notify. The planning core is a separate function from the
//! driver so tests can exercise it against local storage without a
//! flag service.
//!
//! Every run ends in exactly one of three states: success with N new
//! domains and an advanced watermark, success with zero new domains and
//! an unchanged watermark, or failure with a reported error and no
//! remote state change. There are no retries anywhere; re-invoking the
//! whole run is the scheduler's job, and a failed PATCH leaves the
//! remote watermark stale so the same window is reprocessed next time.

use chrono::{DateTime, NaiveDate, Utc};
use snafu::prelude::*;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::emit;
use crate::error::{
    ConfigSnafu, ManifestSnafu, NotifySnafu, RunError, RunStorageSnafu, SegmentSnafu, error_chain,
};
use crate::extract;
use crate::manifest;
use crate::merge;
use crate::metrics::events::{DomainsMerged, RunCompleted, RunOutcome};
use crate::notify::{Notifier, success_blocks};
use crate::segment::{PatchOperation, Segment, SegmentClient};
use crate::storage::{StorageProvider, StorageProviderRef};
use crate::watermark;

/// Statistics about a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub manifests: usize,
    pub data_files: usize,
    pub files_skipped: usize,
    pub new_domains: usize,
    pub patch_operations: usize,
    pub watermark: String,
    pub watermark_advanced: bool,
}

/// Inputs to the planning core, separated from `Config` so tests can
/// pin the clock.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Wall-clock "now"; the day range runs through this day.
    pub now: DateTime<Utc>,
    pub fallback_date: NaiveDate,
    pub patch_value_limit: usize,
    pub clause_attribute: String,
    pub data_url_prefix: String,
    pub max_concurrent_fetches: usize,
}

impl PlanOptions {
    fn from_config(config: &Config) -> Self {
        Self {
            now: Utc::now(),
            fallback_date: config.watermark.fallback_date,
            patch_value_limit: config.segment.patch_value_limit,
            clause_attribute: config.segment.clause_attribute.clone(),
            data_url_prefix: config.data_url_prefix().to_string(),
            max_concurrent_fetches: config.source.max_concurrent_fetches,
        }
    }
}

/// The write decision for one run.
#[derive(Debug)]
pub enum Plan {
    /// Nothing new arrived; no PATCH is sent and the watermark is
    /// carried forward unchanged.
    NoNewDomains { stats: RunStats },
    /// New domains to write, as assembled patch operations.
    Patch {
        operations: Vec<PatchOperation>,
        stats: RunStats,
    },
}

impl Plan {
    /// The run statistics regardless of outcome.
    pub fn stats(&self) -> &RunStats {
        match self {
            Plan::NoNewDomains { stats } | Plan::Patch { stats, .. } => stats,
        }
    }
}

/// Compute the incremental window and assemble the write for one run.
///
/// This is everything between the segment GET and the PATCH: watermark
/// extraction, day-range scan, manifest resolution, extraction, dedupe,
/// watermark recomputation, and patch assembly.
pub async fn plan_reconciliation(
    storage: &StorageProvider,
    notifier: &Notifier,
    segment: &Segment,
    opts: &PlanOptions,
) -> Result<Plan, RunError> {
    let extracted = watermark::extract(segment, opts.fallback_date);
    if extracted.used_fallback {
        warn!(
            "No parseable watermark in segment descriptions, falling back to {}",
            opts.fallback_date
        );
        notifier
            .notify_text(&format!(
                "No parseable watermark found in the segment; scanning from fallback date {}",
                opts.fallback_date
            ))
            .await;
    }
    let current = extracted.value;
    info!("Watermark: {}", watermark::format_display(current));

    let days = watermark::days_through_today(current, opts.now.date_naive());
    info!("Scanning {} day partition(s)", days.len());

    let refs = manifest::scan_range(storage, current, &days)
        .await
        .context(ManifestSnafu)?;

    let urls = manifest::resolve(storage, &refs, opts.max_concurrent_fetches)
        .await
        .context(ManifestSnafu)?;
    info!(
        "Resolved {} manifests to {} data files",
        refs.len(),
        urls.len()
    );

    let extraction = extract::extract_all(
        storage,
        notifier,
        &urls,
        &opts.data_url_prefix,
        opts.max_concurrent_fetches,
    )
    .await;

    let new_domains = merge::dedupe(extraction.per_file);
    emit!(DomainsMerged {
        count: new_domains.len() as u64
    });

    let mut stats = RunStats {
        manifests: refs.len(),
        data_files: urls.len(),
        files_skipped: extraction.skipped,
        new_domains: new_domains.len(),
        patch_operations: 0,
        watermark: watermark::format_display(current),
        watermark_advanced: false,
    };

    if new_domains.is_empty() {
        info!("No new domains since the watermark, skipping write-back");
        return Ok(Plan::NoNewDomains { stats });
    }

    // Watermark advances to the latest processed file, never backward.
    match merge::latest_file_timestamp(&urls) {
        Some(latest) if latest > current => {
            stats.watermark = watermark::format_display(latest);
            stats.watermark_advanced = true;
        }
        Some(_) => {}
        None => {
            warn!("Malformed timestamp token in data-file path, keeping prior watermark");
            notifier
                .notify_text(
                    "Could not derive a new watermark from the latest data file; \
                     keeping the prior watermark for this run",
                )
                .await;
        }
    }

    let operations = merge::build_operations(
        segment.rules.first(),
        &new_domains,
        &stats.watermark,
        opts.patch_value_limit,
        &opts.clause_attribute,
    );
    stats.patch_operations = operations.len();

    Ok(Plan::Patch { operations, stats })
}

/// One reconciliation run against the configured services.
pub struct Reconciler {
    storage: StorageProviderRef,
    segments: SegmentClient,
    notifier: Notifier,
    opts: PlanOptions,
}

impl Reconciler {
    /// Build the run's collaborators from configuration.
    pub async fn new(config: Config) -> Result<Self, RunError> {
        let token = config.access_token().context(ConfigSnafu)?;
        let webhook_url = config.webhook_url().context(ConfigSnafu)?;

        let storage = Arc::new(
            StorageProvider::for_url_with_options(
                &config.source.bucket_url,
                config.source.storage_options.clone(),
            )
            .await
            .context(RunStorageSnafu)?,
        );

        let segments = SegmentClient::new(&config.segment, token).context(SegmentSnafu)?;
        let notifier = Notifier::new(webhook_url).context(NotifySnafu)?;
        let opts = PlanOptions::from_config(&config);

        Ok(Self {
            storage,
            segments,
            notifier,
            opts,
        })
    }

    /// Run the reconciliation, reporting any failure to the notifier
    /// exactly once before propagating it.
    pub async fn run(&self) -> Result<RunStats, RunError> {
        match self.run_inner().await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                emit!(RunCompleted {
                    outcome: RunOutcome::Failed
                });
                self.notifier
                    .notify_text(&format!(
                        "Segment reconciliation failed: {}",
                        error_chain(&e)
                    ))
                    .await;
                Err(e)
            }
        }
    }

    async fn run_inner(&self) -> Result<RunStats, RunError> {
        let segment = self.segments.get_segment().await.context(SegmentSnafu)?;

        let plan = plan_reconciliation(&self.storage, &self.notifier, &segment, &self.opts).await?;

        match plan {
            Plan::NoNewDomains { stats } => {
                emit!(RunCompleted {
                    outcome: RunOutcome::NoNewDomains
                });
                self.notifier
                    .notify_text(&format!(
                        "Segment reconciliation complete: no new domains since {}",
                        stats.watermark
                    ))
                    .await;
                Ok(stats)
            }
            Plan::Patch { operations, stats } => {
                self.segments
                    .patch_segment(&operations)
                    .await
                    .context(SegmentSnafu)?;

                emit!(RunCompleted {
                    outcome: RunOutcome::Updated
                });
                self.notifier
                    .notify_blocks(success_blocks(stats.new_domains, &stats.watermark))
                    .await;
                Ok(stats)
            }
        }
    }
}

/// Run one reconciliation with the given configuration.
pub async fn run_reconciliation(config: Config) -> Result<RunStats, RunError> {
    let reconciler = Reconciler::new(config).await?;
    reconciler.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_stats_default() {
        let stats = RunStats::default();
        assert_eq!(stats.new_domains, 0);
        assert!(!stats.watermark_advanced);
    }
}
