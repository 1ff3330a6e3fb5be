//! Configuration parsing and validation.
//!
//! Handles loading configuration from YAML files. Secrets (the segment
//! access token and the webhook URL) may be supplied via environment
//! variables instead of the file so they stay out of version control.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{
    ConfigError, EmptyBucketUrlSnafu, EmptySegmentFieldSnafu, MissingAccessTokenSnafu,
    MissingWebhookUrlSnafu, ReadFileSnafu, YamlParseSnafu, ZeroConcurrencySnafu,
    ZeroPatchLimitSnafu,
};

/// Environment variable overriding `segment.access_token`.
pub const ACCESS_TOKEN_VAR: &str = "SEGSYNC_ACCESS_TOKEN";

/// Environment variable overriding `notify.webhook_url`.
pub const WEBHOOK_URL_VAR: &str = "SEGSYNC_WEBHOOK_URL";

/// Main configuration structure for a reconciliation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub segment: SegmentConfig,
    /// Watermark configuration (optional, defaults apply).
    #[serde(default)]
    pub watermark: WatermarkConfig,
    /// Notification configuration.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Metrics configuration (optional, disabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Source configuration for the export bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Object-store URL of the export bucket root.
    /// Examples: "s3://exports-bucket/domains", "/local/path/exports"
    pub bucket_url: String,

    /// URL prefix under which manifest-listed data files live.
    /// Defaults to `bucket_url`; only needs setting when manifests refer
    /// to the bucket by a different URL than the one used to read it.
    #[serde(default)]
    pub data_url_prefix: Option<String>,

    /// Storage options (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,

    /// Maximum concurrent manifest/data-file fetches (default: 8).
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

fn default_max_concurrent_fetches() -> usize {
    8
}

/// Flag-service segment coordinates and patch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    /// Base URL of the flag-rule service.
    pub base_url: String,

    /// Project key.
    pub project: String,

    /// Environment key.
    pub environment: String,

    /// Segment key.
    pub key: String,

    /// Service access token. Prefer the SEGSYNC_ACCESS_TOKEN env var.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Maximum number of values carried by a single patch operation
    /// (default: 5000). Oversized merges are split into multiple
    /// operations.
    #[serde(default = "default_patch_value_limit")]
    pub patch_value_limit: usize,

    /// Clause attribute the domain values are matched against
    /// (default: "email").
    #[serde(default = "default_clause_attribute")]
    pub clause_attribute: String,
}

fn default_patch_value_limit() -> usize {
    5000
}

fn default_clause_attribute() -> String {
    "email".to_string()
}

/// Watermark fallback configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkConfig {
    /// Date used when no rule description parses as a watermark.
    #[serde(default = "default_fallback_date")]
    pub fallback_date: NaiveDate,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            fallback_date: default_fallback_date(),
        }
    }
}

fn default_fallback_date() -> NaiveDate {
    // Earliest export partition the job will ever scan back to.
    NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid constant date")
}

/// Notification webhook configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Messaging webhook target. Prefer the SEGSYNC_WEBHOOK_URL env var.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether the metrics endpoint is enabled (default: false for a
    /// single-shot batch run).
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9184").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_address() -> String {
    "0.0.0.0:9184".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, failing fast on anything missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.source.bucket_url.is_empty(), EmptyBucketUrlSnafu);
        ensure!(
            !self.segment.base_url.is_empty(),
            EmptySegmentFieldSnafu { field: "base_url" }
        );
        ensure!(
            !self.segment.project.is_empty(),
            EmptySegmentFieldSnafu { field: "project" }
        );
        ensure!(
            !self.segment.environment.is_empty(),
            EmptySegmentFieldSnafu {
                field: "environment"
            }
        );
        ensure!(
            !self.segment.key.is_empty(),
            EmptySegmentFieldSnafu { field: "key" }
        );
        ensure!(self.segment.patch_value_limit >= 1, ZeroPatchLimitSnafu);
        ensure!(self.source.max_concurrent_fetches >= 1, ZeroConcurrencySnafu);
        self.access_token()?;
        self.webhook_url()?;
        Ok(())
    }

    /// Resolve the segment access token from the config or environment.
    pub fn access_token(&self) -> Result<String, ConfigError> {
        self.segment
            .access_token
            .clone()
            .or_else(|| std::env::var(ACCESS_TOKEN_VAR).ok())
            .filter(|token| !token.is_empty())
            .context(MissingAccessTokenSnafu)
    }

    /// Resolve the webhook URL from the config or environment.
    pub fn webhook_url(&self) -> Result<String, ConfigError> {
        self.notify
            .webhook_url
            .clone()
            .or_else(|| std::env::var(WEBHOOK_URL_VAR).ok())
            .filter(|url| !url.is_empty())
            .context(MissingWebhookUrlSnafu)
    }

    /// URL prefix to strip from manifest-listed data-file URLs.
    pub fn data_url_prefix(&self) -> &str {
        self.source
            .data_url_prefix
            .as_deref()
            .unwrap_or(&self.source.bucket_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_yaml() -> &'static str {
        r#"
source:
  bucket_url: "s3://exports-bucket/domains"
  max_concurrent_fetches: 4

segment:
  base_url: "https://flags.example.com"
  project: "acme"
  environment: "production"
  key: "known-email-domains"
  access_token: "api-xyz"
  patch_value_limit: 2000

watermark:
  fallback_date: 2024-03-01

notify:
  webhook_url: "https://hooks.example.com/T000/B000"
"#
    }

    #[test]
    fn test_config_yaml_parsing() {
        let config: Config = serde_yaml::from_str(full_yaml()).unwrap();

        assert_eq!(config.source.bucket_url, "s3://exports-bucket/domains");
        assert_eq!(config.source.max_concurrent_fetches, 4);
        assert_eq!(config.segment.patch_value_limit, 2000);
        assert_eq!(
            config.watermark.fallback_date,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_config_defaults() {
        let yaml = r#"
source:
  bucket_url: "s3://exports-bucket/domains"

segment:
  base_url: "https://flags.example.com"
  project: "acme"
  environment: "production"
  key: "known-email-domains"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.source.max_concurrent_fetches, 8);
        assert_eq!(config.segment.patch_value_limit, 5000);
        assert_eq!(config.segment.clause_attribute, "email");
        assert_eq!(
            config.watermark.fallback_date,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert!(!config.metrics.enabled);
        assert_eq!(config.data_url_prefix(), "s3://exports-bucket/domains");
    }

    #[test]
    fn test_validate_rejects_empty_segment_key() {
        let mut config: Config = serde_yaml::from_str(full_yaml()).unwrap();
        config.segment.key.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptySegmentField { field: "key" })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_patch_limit() {
        let mut config: Config = serde_yaml::from_str(full_yaml()).unwrap();
        config.segment.patch_value_limit = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroPatchLimit)
        ));
    }

    #[test]
    fn test_data_url_prefix_override() {
        let mut config: Config = serde_yaml::from_str(full_yaml()).unwrap();
        config.source.data_url_prefix = Some("s3://mirror-bucket/domains".to_string());
        assert_eq!(config.data_url_prefix(), "s3://mirror-bucket/domains");
    }
}
