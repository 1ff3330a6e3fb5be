//! Aggregation and merge: dedupe, watermark recovery, patch assembly.
//!
//! The merge owns the set semantics of the run: extracted values are
//! deduplicated across all files, merged with the existing rule's
//! values, and split into size-bounded patch operations. The new
//! watermark is recovered from the chronologically last data-file URL,
//! not from extraction results, so fan-out completion order cannot
//! affect it.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;

use crate::segment::{CLAUSE_OP, Clause, PatchOp, PatchOperation, RULE_PATH, SegmentRule};
use crate::watermark::TIME_TOKEN_WIDTH;

/// Path segment positions inside a data-file URL, split on `/`:
/// `s3://bucket/prefix/<YYYY>/<MM>/<DD>/<token>/<file>` puts the date at
/// segments 4-6 and the 10-character time token at segment 7.
const YEAR_SEGMENT: usize = 4;
const TOKEN_SEGMENT: usize = 7;

/// Flatten per-file value lists into one deduplicated sequence.
///
/// Null/empty values are removed; first occurrence wins. Order carries
/// no meaning downstream but is kept deterministic.
pub fn dedupe(per_file: Vec<Vec<String>>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut domains = Vec::new();
    for value in per_file.into_iter().flatten() {
        if value.is_empty() {
            continue;
        }
        if seen.insert(value.clone()) {
            domains.push(value);
        }
    }
    domains
}

/// Composite chronological key of a data-file URL, or `None` when the
/// URL is too short to carry the partition segments.
fn url_sort_key(url: &str) -> Option<String> {
    let segments: Vec<&str> = url.split('/').collect();
    if segments.len() <= TOKEN_SEGMENT {
        return None;
    }
    Some(segments[YEAR_SEGMENT..=TOKEN_SEGMENT].concat())
}

/// Recover the timestamp embedded in the chronologically last data-file
/// URL.
///
/// Returns `None` when no URL carries the partition segments or when the
/// last URL's token is malformed (not exactly 10 characters); the caller
/// then carries the prior watermark forward unchanged.
pub fn latest_file_timestamp(urls: &[String]) -> Option<DateTime<Utc>> {
    let (_, last) = urls
        .iter()
        .filter_map(|url| url_sort_key(url).map(|key| (key, url)))
        .max()?;
    timestamp_from_url(last)
}

/// Parse the year/month/day segments and HHMMSS token prefix of one
/// data-file URL into a UTC instant.
fn timestamp_from_url(url: &str) -> Option<DateTime<Utc>> {
    let segments: Vec<&str> = url.split('/').collect();
    if segments.len() <= TOKEN_SEGMENT {
        return None;
    }

    let token = segments[TOKEN_SEGMENT];
    if token.len() != TIME_TOKEN_WIDTH {
        return None;
    }

    let date = NaiveDate::from_ymd_opt(
        segments[YEAR_SEGMENT].parse().ok()?,
        segments[YEAR_SEGMENT + 1].parse().ok()?,
        segments[YEAR_SEGMENT + 2].parse().ok()?,
    )?;

    let time = date.and_hms_opt(
        token.get(0..2)?.parse().ok()?,
        token.get(2..4)?.parse().ok()?,
        token.get(4..6)?.parse().ok()?,
    )?;

    Some(time.and_utc())
}

/// Assemble the patch operations for a set of new domains.
///
/// When the segment already has a rule, the first operation replaces
/// slot 0 with existing ++ new values; otherwise it adds a fresh rule
/// with the new values only. Value lists longer than `limit` are split
/// into consecutive chunks: the first chunk carries the determined
/// operation, every subsequent chunk is an `add` appending a further
/// rule slot. Callers never invoke this with zero new domains.
pub fn build_operations(
    existing: Option<&SegmentRule>,
    new_domains: &[String],
    description: &str,
    limit: usize,
    attribute: &str,
) -> Vec<PatchOperation> {
    let (first_op, merged) = match existing {
        Some(rule) => {
            let mut values = rule.values().to_vec();
            values.extend(new_domains.iter().cloned());
            (PatchOp::Replace, values)
        }
        None => (PatchOp::Add, new_domains.to_vec()),
    };

    merged
        .chunks(limit.max(1))
        .enumerate()
        .map(|(index, chunk)| PatchOperation {
            op: if index == 0 { first_op } else { PatchOp::Add },
            path: RULE_PATH.to_string(),
            value: SegmentRule {
                clauses: vec![Clause {
                    attribute: attribute.to_string(),
                    op: CLAUSE_OP.to_string(),
                    values: chunk.to_vec(),
                    negate: false,
                }],
                description: Some(description.to_string()),
            },
        })
        .collect()
}
