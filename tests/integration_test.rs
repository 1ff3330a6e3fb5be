//! Integration tests for segsync
//!
//! These drive the planning core end-to-end against a local-filesystem
//! bucket seeded with date-partitioned manifests and gzip CSV data
//! files. The flag service never enters the picture: the plan is
//! computed from a `Segment` value and inspected directly.

use chrono::{NaiveDate, TimeZone, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

use segsync::notify::Notifier;
use segsync::pipeline::{Plan, PlanOptions, plan_reconciliation};
use segsync::segment::{CLAUSE_OP, Clause, PatchOp, Segment, SegmentRule};
use segsync::storage::StorageProvider;

/// URL prefix manifests use to refer to the bucket.
const DATA_URL_PREFIX: &str = "s3://exports-bucket/domains";

fn gzip(content: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

/// Seed one export batch: a manifest plus its data files.
fn seed_batch(root: &Path, date: &str, token: &str, files: &[(&str, Option<&str>)]) {
    let batch_dir = root.join(date).join(token);
    std::fs::create_dir_all(&batch_dir).unwrap();

    let entries: Vec<String> = files
        .iter()
        .map(|(name, _)| format!(r#"{{"url": "{DATA_URL_PREFIX}/{date}/{token}/{name}"}}"#))
        .collect();
    let manifest = format!(r#"{{"entries": [{}]}}"#, entries.join(", "));
    std::fs::write(batch_dir.join("manifest"), manifest).unwrap();

    // A `None` body simulates a data file that expired after the
    // manifest was written.
    for (name, body) in files {
        if let Some(body) = body {
            std::fs::write(batch_dir.join(name), gzip(body)).unwrap();
        }
    }
}

async fn storage_for(root: &Path) -> StorageProvider {
    StorageProvider::for_url_with_options(root.to_str().unwrap(), HashMap::new())
        .await
        .unwrap()
}

/// Notifications go nowhere in tests; delivery failures are swallowed.
fn test_notifier() -> Notifier {
    Notifier::new("http://127.0.0.1:9/webhook".to_string()).unwrap()
}

fn options(now: chrono::DateTime<Utc>) -> PlanOptions {
    PlanOptions {
        now,
        fallback_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        patch_value_limit: 5000,
        clause_attribute: "email".to_string(),
        data_url_prefix: DATA_URL_PREFIX.to_string(),
        max_concurrent_fetches: 4,
    }
}

fn segment_with_watermark(description: &str, values: &[&str]) -> Segment {
    Segment {
        rules: vec![SegmentRule {
            clauses: vec![Clause {
                attribute: "email".to_string(),
                op: CLAUSE_OP.to_string(),
                values: values.iter().map(|s| s.to_string()).collect(),
                negate: false,
            }],
            description: Some(description.to_string()),
        }],
    }
}

#[tokio::test]
async fn test_first_run_adds_rule_with_derived_watermark() {
    let temp_dir = TempDir::new().unwrap();
    seed_batch(
        temp_dir.path(),
        "2024/01/02",
        "1230450000",
        &[("part-0.csv.gz", Some("x.com,10\ny.com,20\n"))],
    );

    let storage = storage_for(temp_dir.path()).await;
    let notifier = test_notifier();
    let segment = Segment::default();
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 23, 0, 0).unwrap();

    let plan = plan_reconciliation(&storage, &notifier, &segment, &options(now))
        .await
        .unwrap();

    let Plan::Patch { operations, stats } = plan else {
        panic!("expected a patch plan");
    };

    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].op, PatchOp::Add);
    assert_eq!(operations[0].path, "/rules/0");
    assert_eq!(operations[0].value.values(), ["x.com", "y.com"]);
    assert_eq!(
        operations[0].value.description.as_deref(),
        Some("Jan 02, 2024 at 12:30:45")
    );

    assert_eq!(stats.new_domains, 2);
    assert_eq!(stats.manifests, 1);
    assert!(stats.watermark_advanced);
    assert_eq!(stats.watermark, "Jan 02, 2024 at 12:30:45");
}

#[tokio::test]
async fn test_rerun_above_watermark_finds_nothing() {
    let temp_dir = TempDir::new().unwrap();
    seed_batch(
        temp_dir.path(),
        "2024/01/02",
        "1230450000",
        &[("part-0.csv.gz", Some("x.com\n"))],
    );

    let storage = storage_for(temp_dir.path()).await;
    let notifier = test_notifier();
    // The previous run advanced the watermark to exactly this batch.
    let segment = segment_with_watermark("Jan 02, 2024 at 12:30:45", &["x.com"]);
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 23, 0, 0).unwrap();

    let plan = plan_reconciliation(&storage, &notifier, &segment, &options(now))
        .await
        .unwrap();

    let Plan::NoNewDomains { stats } = plan else {
        panic!("expected no-new-domains plan");
    };
    assert_eq!(stats.manifests, 0);
    assert_eq!(stats.new_domains, 0);
    assert!(!stats.watermark_advanced);
    assert_eq!(stats.watermark, "Jan 02, 2024 at 12:30:45");
}

#[tokio::test]
async fn test_intra_day_bound_excludes_processed_batches() {
    let temp_dir = TempDir::new().unwrap();
    // Same-day batches around the watermark at 12:30:45.
    seed_batch(
        temp_dir.path(),
        "2024/01/02",
        "1230450000",
        &[("part-0.csv.gz", Some("old.com\n"))],
    );
    seed_batch(
        temp_dir.path(),
        "2024/01/02",
        "1430000000",
        &[("part-0.csv.gz", Some("new.com\n"))],
    );
    // Every batch on a later day is included regardless of token.
    seed_batch(
        temp_dir.path(),
        "2024/01/03",
        "0000010000",
        &[("part-0.csv.gz", Some("next-day.com\n"))],
    );

    let storage = storage_for(temp_dir.path()).await;
    let notifier = test_notifier();
    let segment = segment_with_watermark("Jan 02, 2024 at 12:30:45", &["old.com"]);
    let now = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();

    let plan = plan_reconciliation(&storage, &notifier, &segment, &options(now))
        .await
        .unwrap();

    let Plan::Patch { operations, stats } = plan else {
        panic!("expected a patch plan");
    };

    assert_eq!(stats.manifests, 2);
    assert_eq!(stats.new_domains, 2);

    // Existing rule: first op replaces slot 0 with existing ++ new.
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0].op, PatchOp::Replace);
    assert_eq!(
        operations[0].value.values(),
        ["old.com", "new.com", "next-day.com"]
    );

    // Watermark advanced to the latest file across both days.
    assert_eq!(stats.watermark, "Jan 03, 2024 at 00:00:01");
}

#[tokio::test]
async fn test_missing_data_file_is_tolerated() {
    let temp_dir = TempDir::new().unwrap();
    seed_batch(
        temp_dir.path(),
        "2024/01/02",
        "1230450000",
        &[
            ("part-0.csv.gz", Some("x.com\n")),
            ("part-1.csv.gz", None), // listed in the manifest, never written
        ],
    );

    let storage = storage_for(temp_dir.path()).await;
    let notifier = test_notifier();
    let segment = Segment::default();
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 23, 0, 0).unwrap();

    let plan = plan_reconciliation(&storage, &notifier, &segment, &options(now))
        .await
        .unwrap();

    let Plan::Patch { operations, stats } = plan else {
        panic!("expected a patch plan");
    };
    assert_eq!(stats.data_files, 2);
    assert_eq!(stats.files_skipped, 1);
    assert_eq!(operations[0].value.values(), ["x.com"]);
}

#[tokio::test]
async fn test_corrupt_manifest_aborts_the_run() {
    let temp_dir = TempDir::new().unwrap();
    let batch_dir = temp_dir.path().join("2024/01/02/1230450000");
    std::fs::create_dir_all(&batch_dir).unwrap();
    std::fs::write(batch_dir.join("manifest"), b"{ not json").unwrap();

    let storage = storage_for(temp_dir.path()).await;
    let notifier = test_notifier();
    let segment = Segment::default();
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 23, 0, 0).unwrap();

    let result = plan_reconciliation(&storage, &notifier, &segment, &options(now)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_duplicates_across_files_are_merged_once() {
    let temp_dir = TempDir::new().unwrap();
    seed_batch(
        temp_dir.path(),
        "2024/01/02",
        "1230450000",
        &[
            ("part-0.csv.gz", Some("a.com\nb.com\n")),
            ("part-1.csv.gz", Some("a.com\n\nb.com\nc.com\n")),
        ],
    );

    let storage = storage_for(temp_dir.path()).await;
    let notifier = test_notifier();
    let segment = Segment::default();
    let now = Utc.with_ymd_and_hms(2024, 1, 2, 23, 0, 0).unwrap();

    let plan = plan_reconciliation(&storage, &notifier, &segment, &options(now))
        .await
        .unwrap();

    let Plan::Patch { operations, stats } = plan else {
        panic!("expected a patch plan");
    };
    assert_eq!(stats.new_domains, 3);

    let mut values = operations[0].value.values().to_vec();
    values.sort();
    assert_eq!(values, ["a.com", "b.com", "c.com"]);
}

#[tokio::test]
async fn test_empty_bucket_yields_zero_additions() {
    let temp_dir = TempDir::new().unwrap();
    let storage = storage_for(temp_dir.path()).await;
    let notifier = test_notifier();
    let segment = segment_with_watermark("Jan 01, 2024 at 00:00:00", &["a.com"]);
    let now = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();

    let plan = plan_reconciliation(&storage, &notifier, &segment, &options(now))
        .await
        .unwrap();

    let Plan::NoNewDomains { stats } = plan else {
        panic!("expected no-new-domains plan");
    };
    // Three calendar days scanned, none of which exist in the bucket.
    assert_eq!(stats.manifests, 0);
    assert_eq!(stats.watermark, "Jan 01, 2024 at 00:00:00");
}
