//! Data-file fetch, decompression, and domain extraction.
//!
//! Data files are gzip-compressed, headerless CSV; the domain value is
//! column 0 of every row. Unlike the manifest stage, failures here are
//! isolated: a missing or corrupt data file contributes an explicit
//! empty result and the run continues. An export occasionally expires
//! objects between manifest write and our read, and losing one file's
//! rows must not abort the whole catch-up.

use flate2::read::GzDecoder;
use futures::stream::{self, StreamExt};
use snafu::prelude::*;
use std::io::Read;
use tracing::{debug, warn};

use crate::emit;
use crate::error::{CsvParseSnafu, ExtractError, GunzipSnafu};
use crate::metrics::events::{DataFileProcessed, FileStatus};
use crate::notify::Notifier;
use crate::storage::StorageProvider;

/// Combined result of the per-file extraction fan-out.
#[derive(Debug, Default)]
pub struct ExtractedDomains {
    /// One value list per data file; skipped files contribute an empty
    /// list rather than a hole.
    pub per_file: Vec<Vec<String>>,
    /// Number of files that contributed nothing (missing, empty, or
    /// undecodable).
    pub skipped: usize,
}

/// Fetch and extract every data file concurrently.
///
/// Each task returns its own result; the lists are combined only after
/// all tasks complete. Ordering is irrelevant here since the new
/// watermark is computed from the URL list, not the extraction results.
pub async fn extract_all(
    storage: &StorageProvider,
    notifier: &Notifier,
    urls: &[String],
    data_url_prefix: &str,
    max_concurrent: usize,
) -> ExtractedDomains {
    let results: Vec<Option<Vec<String>>> = stream::iter(urls)
        .map(|url| domains_for_file(storage, notifier, url, data_url_prefix))
        .buffer_unordered(max_concurrent)
        .collect()
        .await;

    let mut extracted = ExtractedDomains::default();
    for result in results {
        match result {
            Some(values) => extracted.per_file.push(values),
            None => {
                extracted.per_file.push(Vec::new());
                extracted.skipped += 1;
            }
        }
    }

    debug!(
        "Extracted {} files ({} skipped)",
        urls.len(),
        extracted.skipped
    );
    extracted
}

/// Extract the domain column from a single data file.
///
/// Returns `None` when the file contributed nothing: unknown URL prefix,
/// object not found, empty object, or an undecodable payload. All of
/// these are reported and swallowed.
async fn domains_for_file(
    storage: &StorageProvider,
    notifier: &Notifier,
    url: &str,
    data_url_prefix: &str,
) -> Option<Vec<String>> {
    let Some(key) = strip_data_url(url, data_url_prefix) else {
        warn!("Data file URL outside configured bucket prefix: {}", url);
        notifier
            .notify_text(&format!(
                "Skipping data file outside the export bucket: {url}"
            ))
            .await;
        emit!(DataFileProcessed {
            status: FileStatus::Skipped
        });
        return None;
    };

    let bytes = match storage.get(key).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => {
            warn!("Data file already gone: {}", key);
            notifier
                .notify_text(&format!("Data file missing, skipping: {key}"))
                .await;
            emit!(DataFileProcessed {
                status: FileStatus::Skipped
            });
            return None;
        }
        Err(e) => {
            // One unreadable data file must not abort the run.
            warn!("Failed to fetch data file {}: {}", key, e);
            notifier
                .notify_text(&format!("Failed to fetch data file {key}: {e}"))
                .await;
            emit!(DataFileProcessed {
                status: FileStatus::Failed
            });
            return None;
        }
    };

    if bytes.is_empty() {
        warn!("Data file is empty: {}", key);
        notifier
            .notify_text(&format!("Data file empty, skipping: {key}"))
            .await;
        emit!(DataFileProcessed {
            status: FileStatus::Skipped
        });
        return None;
    }

    match parse_domains(&bytes) {
        Ok(values) => {
            emit!(DataFileProcessed {
                status: FileStatus::Success
            });
            debug!("{}: {} rows", key, values.len());
            Some(values)
        }
        Err(e) => {
            warn!("Failed to decode data file {}: {}", key, e);
            notifier
                .notify_text(&format!("Failed to decode data file {key}: {e}"))
                .await;
            emit!(DataFileProcessed {
                status: FileStatus::Failed
            });
            None
        }
    }
}

/// Strip the configured bucket prefix from a manifest-listed URL to
/// obtain the storage key.
pub fn strip_data_url<'a>(url: &'a str, data_url_prefix: &str) -> Option<&'a str> {
    url.strip_prefix(data_url_prefix.trim_end_matches('/'))?
        .strip_prefix('/')
}

/// Gunzip and parse a data file, returning column 0 of every row.
///
/// Rows are headerless and may be ragged; empty values are kept here and
/// filtered during the merge, which owns the set semantics.
fn parse_domains(compressed: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut decoder = GzDecoder::new(compressed);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .context(GunzipSnafu)?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(decompressed.as_slice());

    let mut values = Vec::new();
    for record in reader.records() {
        let record = record.context(CsvParseSnafu)?;
        values.push(record.get(0).unwrap_or_default().to_string());
    }
    Ok(values)
}
