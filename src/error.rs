//! Error types for segsync using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the codebase. The taxonomy mirrors the run
//! semantics: storage listing and manifest errors abort a run, per-file
//! extraction errors are isolated, and notifier errors are never fatal.

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Invalid storage URL format.
    #[snafu(display("Invalid storage URL: {url}"))]
    InvalidUrl { url: String },

    /// Object store operation failed.
    #[snafu(display("Storage operation failed"))]
    ObjectStore { source: object_store::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error"))]
    S3Config { source: object_store::Error },

    /// Local filesystem configuration error.
    #[snafu(display("Local storage configuration error"))]
    LocalConfig { source: object_store::Error },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Source bucket URL is empty.
    #[snafu(display("Source bucket URL cannot be empty"))]
    EmptyBucketUrl,

    /// A segment coordinate (base URL, project, environment, or key) is empty.
    #[snafu(display("Segment {field} cannot be empty"))]
    EmptySegmentField { field: &'static str },

    /// No access token in the config file or SEGSYNC_ACCESS_TOKEN.
    #[snafu(display("Segment access token is not configured"))]
    MissingAccessToken,

    /// No webhook URL in the config file or SEGSYNC_WEBHOOK_URL.
    #[snafu(display("Notification webhook URL is not configured"))]
    MissingWebhookUrl,

    /// Patch value limit must allow at least one value per operation.
    #[snafu(display("patch_value_limit must be at least 1"))]
    ZeroPatchLimit,

    /// Fetch concurrency must allow at least one in-flight request.
    #[snafu(display("max_concurrent_fetches must be at least 1"))]
    ZeroConcurrency,

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Manifest Errors ============

/// Errors raised while scanning for or resolving manifests.
///
/// All of these abort the run: an incompletely listed day or a
/// partially-read manifest could silently lose domains.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ManifestError {
    /// Listing a day partition failed.
    #[snafu(display("Failed to list day partition {prefix}"))]
    List {
        source: StorageError,
        prefix: String,
    },

    /// Fetching a manifest object failed.
    #[snafu(display("Failed to fetch manifest {key}"))]
    Fetch {
        source: StorageError,
        key: String,
    },

    /// Manifest content was not valid UTF-8.
    #[snafu(display("Manifest {key} is not valid UTF-8"))]
    Utf8 {
        source: std::str::Utf8Error,
        key: String,
    },

    /// Manifest content was not valid JSON.
    #[snafu(display("Failed to parse manifest {key}"))]
    Json {
        source: serde_json::Error,
        key: String,
    },
}

// ============ Extract Errors ============

/// Errors raised while decoding a single data file.
///
/// These are recoverable: the file contributes an empty result and the
/// run continues.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ExtractError {
    /// Gzip decompression failed.
    #[snafu(display("Gzip decompression failed"))]
    Gunzip { source: std::io::Error },

    /// Delimited row parsing failed.
    #[snafu(display("CSV parsing failed"))]
    CsvParse { source: csv::Error },
}

// ============ Segment Errors ============

/// Errors that can occur talking to the flag-rule service.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SegmentError {
    /// Failed to construct the HTTP client.
    #[snafu(display("Failed to build segment API client"))]
    BuildClient { source: reqwest::Error },

    /// Transport-level request failure.
    #[snafu(display("Segment API request failed"))]
    Http { source: reqwest::Error },

    /// The service answered with a non-success status.
    #[snafu(display("Segment API error ({status}): {body}"))]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
}

// ============ Notify Errors ============

/// Errors constructing the webhook notifier.
///
/// Delivery failures are deliberately not represented here: notifications
/// are best-effort and a failed post only produces a warning.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum NotifyError {
    /// Failed to construct the HTTP client.
    #[snafu(display("Failed to build webhook client"))]
    BuildNotifier { source: reqwest::Error },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Run Error (top-level) ============

/// Top-level run errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RunError {
    /// Storage error.
    #[snafu(display("Storage error"))]
    RunStorage { source: StorageError },

    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Manifest scan/resolve error.
    #[snafu(display("Manifest error"))]
    Manifest { source: ManifestError },

    /// Flag-rule service error.
    #[snafu(display("Segment service error"))]
    Segment { source: SegmentError },

    /// Notifier construction error.
    #[snafu(display("Notifier error"))]
    Notify { source: NotifyError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}

/// Render an error and its source chain on one line, for notifications.
pub fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
