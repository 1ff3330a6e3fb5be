//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the run.
//! Events implement the `InternalEvent` trait which emits the
//! corresponding Prometheus metric.

use metrics::counter;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Storage operation kind.
#[derive(Debug, Clone, Copy)]
pub enum StorageOperation {
    List,
    Get,
}

impl StorageOperation {
    fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::List => "list",
            StorageOperation::Get => "get",
        }
    }
}

/// Outcome of a storage request.
#[derive(Debug, Clone, Copy)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Event emitted per object-store request.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            "Storage request"
        );
        counter!(
            "segsync_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str()
        )
        .increment(1);
    }
}

/// Event emitted after the manifest scan fan-in.
pub struct ManifestsDiscovered {
    pub count: u64,
}

impl InternalEvent for ManifestsDiscovered {
    fn emit(self) {
        trace!(count = self.count, "Manifests discovered");
        counter!("segsync_manifests_discovered_total").increment(self.count);
    }
}

/// Status of a processed data file.
#[derive(Debug, Clone, Copy)]
pub enum FileStatus {
    Success,
    Skipped,
    Failed,
}

impl FileStatus {
    fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Success => "success",
            FileStatus::Skipped => "skipped",
            FileStatus::Failed => "failed",
        }
    }
}

/// Event emitted when a data file is processed.
pub struct DataFileProcessed {
    pub status: FileStatus,
}

impl InternalEvent for DataFileProcessed {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Data file processed");
        counter!("segsync_data_files_total", "status" => self.status.as_str()).increment(1);
    }
}

/// Event emitted with the deduplicated new-domain count of a run.
pub struct DomainsMerged {
    pub count: u64,
}

impl InternalEvent for DomainsMerged {
    fn emit(self) {
        trace!(count = self.count, "Domains merged");
        counter!("segsync_domains_merged_total").increment(self.count);
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, Copy)]
pub enum RunOutcome {
    Updated,
    NoNewDomains,
    Failed,
}

impl RunOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Updated => "updated",
            RunOutcome::NoNewDomains => "no_new_domains",
            RunOutcome::Failed => "failed",
        }
    }
}

/// Event emitted once per run with its terminal outcome.
pub struct RunCompleted {
    pub outcome: RunOutcome,
}

impl InternalEvent for RunCompleted {
    fn emit(self) {
        trace!(outcome = self.outcome.as_str(), "Run completed");
        counter!("segsync_runs_total", "outcome" => self.outcome.as_str()).increment(1);
    }
}
