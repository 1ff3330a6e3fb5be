//! Manifest discovery and resolution.
//!
//! Each export batch writes a small JSON manifest at
//! `<YYYY>/<MM>/<DD>/<token>/manifest` listing the URLs of its data
//! files. Discovery lists every day in the watermark range concurrently,
//! filters by the intra-day token bound, then sorts the combined result
//! chronologically before resolution so "the last manifest processed" is
//! truly the latest one regardless of fan-out completion order.
//!
//! Scan and resolve failures abort the run: an incompletely listed day
//! or a partially-read manifest risks incomplete domain coverage.

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::try_join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Deserialize;
use snafu::prelude::*;
use tracing::debug;

use crate::emit;
use crate::error::{FetchSnafu, JsonSnafu, ListSnafu, ManifestError, Utf8Snafu};
use crate::metrics::events::ManifestsDiscovered;
use crate::storage::StorageProvider;
use crate::watermark;

/// Final path segment that marks a manifest object.
pub const MANIFEST_FILE_NAME: &str = "manifest";

/// A discovered manifest object in the export bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRef {
    /// Partition date.
    pub date: NaiveDate,
    /// Fixed-width intra-day time token.
    pub token: String,
    /// Full object key, relative to the bucket root.
    pub key: String,
}

impl ManifestRef {
    /// Parse a listed key of the form `YYYY/MM/DD/<token>/manifest`.
    ///
    /// Returns `None` for anything else under the partition (data files,
    /// markers, unexpected layouts).
    pub fn from_key(key: &str) -> Option<Self> {
        let segments: Vec<&str> = key.split('/').collect();
        let [year, month, day, token, name] = segments.as_slice() else {
            return None;
        };
        if *name != MANIFEST_FILE_NAME {
            return None;
        }

        let date = NaiveDate::from_ymd_opt(
            year.parse().ok()?,
            month.parse().ok()?,
            day.parse().ok()?,
        )?;

        Some(Self {
            date,
            token: (*token).to_string(),
            key: key.to_string(),
        })
    }

    /// Composite chronological sort key: `YYYYMMDD<token>`.
    ///
    /// Both halves are fixed-width and zero-padded, so lexicographic
    /// order equals chronological order.
    pub fn sort_key(&self) -> String {
        format!("{}{}", self.date.format("%Y%m%d"), self.token)
    }
}

/// A manifest document: a JSON index of one batch's data files.
#[derive(Debug, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

/// One data-file entry inside a manifest.
#[derive(Debug, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
}

/// Scan every day in the range concurrently and return the combined
/// manifest references, globally sorted chronologically.
pub async fn scan_range(
    storage: &StorageProvider,
    watermark: DateTime<Utc>,
    days: &[NaiveDate],
) -> Result<Vec<ManifestRef>, ManifestError> {
    let scans = days
        .iter()
        .map(|day| scan_day(storage, *day, watermark::bound_for_day(watermark, *day)));

    let mut refs: Vec<ManifestRef> = try_join_all(scans).await?.into_iter().flatten().collect();

    refs.sort_by_key(ManifestRef::sort_key);

    emit!(ManifestsDiscovered {
        count: refs.len() as u64
    });
    debug!("Discovered {} manifests across {} days", refs.len(), days.len());

    Ok(refs)
}

/// List one day partition and keep manifests newer than the bound.
///
/// `bound` is the intra-day lower bound: entries whose token strictly
/// exceeds it are kept; `None` keeps the entire day.
async fn scan_day(
    storage: &StorageProvider,
    day: NaiveDate,
    bound: Option<String>,
) -> Result<Vec<ManifestRef>, ManifestError> {
    let prefix = watermark::day_prefix(day);
    let keys = storage
        .list_with_prefix(&prefix)
        .await
        .context(ListSnafu { prefix: &prefix })?;

    let refs: Vec<ManifestRef> = keys
        .iter()
        .filter_map(|key| ManifestRef::from_key(key))
        .filter(|m| match &bound {
            Some(bound) => m.token.as_str() > bound.as_str(),
            None => true,
        })
        .collect();

    debug!("{}: {} new manifests", prefix, refs.len());
    Ok(refs)
}

/// Resolve manifests to the flat list of data-file URLs they reference.
///
/// Fetch and parse run concurrently under `max_concurrent`; any failure
/// aborts the run (no partial-success continuation at this stage).
pub async fn resolve(
    storage: &StorageProvider,
    refs: &[ManifestRef],
    max_concurrent: usize,
) -> Result<Vec<String>, ManifestError> {
    let per_manifest: Vec<Vec<String>> = stream::iter(refs)
        .map(|manifest| resolve_one(storage, manifest))
        .buffered(max_concurrent)
        .try_collect()
        .await?;

    Ok(per_manifest.into_iter().flatten().collect())
}

async fn resolve_one(
    storage: &StorageProvider,
    manifest: &ManifestRef,
) -> Result<Vec<String>, ManifestError> {
    let bytes = storage
        .get(manifest.key.as_str())
        .await
        .context(FetchSnafu {
            key: &manifest.key,
        })?;

    let text = std::str::from_utf8(&bytes).context(Utf8Snafu {
        key: &manifest.key,
    })?;

    let parsed: Manifest = serde_json::from_str(text).context(JsonSnafu {
        key: &manifest.key,
    })?;

    Ok(parsed.entries.into_iter().map(|entry| entry.url).collect())
}
