//! Flag-service segment types and REST client.
//!
//! The remote segment is the sole source of truth for the domain rule;
//! this pipeline reads it once at the start of a run and writes it once
//! at the end via a JSON-patch style PATCH. Only `rules[0]` is ever
//! rewritten; overflow chunks append additional rule slots.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::time::Duration;

use crate::config::SegmentConfig;
use crate::error::{ApiSnafu, BuildClientSnafu, HttpSnafu, SegmentError};

/// JSON-patch path of the rule slot this pipeline maintains.
pub const RULE_PATH: &str = "/rules/0";

/// Clause operator used for the domain list.
pub const CLAUSE_OP: &str = "in";

/// A targeting segment as returned by the flag service.
///
/// Unknown fields are ignored; the pipeline only reads `rules`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Segment {
    #[serde(default)]
    pub rules: Vec<SegmentRule>,
}

/// One rule slot of a segment. The `description` doubles as the
/// watermark carrier (see the watermark module).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentRule {
    #[serde(default)]
    pub clauses: Vec<Clause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SegmentRule {
    /// The domain values currently held by this rule.
    pub fn values(&self) -> &[String] {
        self.clauses
            .first()
            .map(|clause| clause.values.as_slice())
            .unwrap_or_default()
    }
}

/// A single clause of a segment rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clause {
    pub attribute: String,
    pub op: String,
    pub values: Vec<String>,
    #[serde(default)]
    pub negate: bool,
}

/// Patch operation kind. First chunk replaces an existing slot (or adds
/// when none exists); every overflow chunk is an add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
}

/// One unit of change sent to the flag service: a full replacement value
/// for one rule slot.
#[derive(Debug, Clone, Serialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    pub value: SegmentRule,
}

/// REST client for the flag-rule service.
pub struct SegmentClient {
    client: reqwest::Client,
    segment_url: String,
    token: String,
}

impl SegmentClient {
    /// Create a client for the configured segment.
    pub fn new(config: &SegmentConfig, token: String) -> Result<Self, SegmentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context(BuildClientSnafu)?;

        let segment_url = format!(
            "{}/api/v2/segments/{}/{}/{}",
            config.base_url.trim_end_matches('/'),
            config.project,
            config.environment,
            config.key
        );

        Ok(Self {
            client,
            segment_url,
            token,
        })
    }

    /// Fetch the current segment document.
    pub async fn get_segment(&self) -> Result<Segment, SegmentError> {
        let response = self
            .client
            .get(&self.segment_url)
            .bearer_auth(&self.token)
            .send()
            .await
            .context(HttpSnafu)?;

        if response.status().is_success() {
            response.json().await.context(HttpSnafu)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            ApiSnafu { status, body }.fail()
        }
    }

    /// Apply the assembled patch operations to the segment.
    pub async fn patch_segment(&self, operations: &[PatchOperation]) -> Result<(), SegmentError> {
        let response = self
            .client
            .patch(&self.segment_url)
            .bearer_auth(&self.token)
            .json(operations)
            .send()
            .await
            .context(HttpSnafu)?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            ApiSnafu { status, body }.fail()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_deserializes_service_payload() {
        let json = r#"
        {
            "name": "Known email domains",
            "key": "known-email-domains",
            "rules": [
                {
                    "clauses": [
                        {"attribute": "email", "op": "in", "values": ["a.com", "b.com"], "negate": false}
                    ],
                    "description": "Mar 14, 2024 at 05:23:45"
                }
            ],
            "version": 42
        }"#;
        let segment: Segment = serde_json::from_str(json).unwrap();
        assert_eq!(segment.rules.len(), 1);
        assert_eq!(segment.rules[0].values(), ["a.com", "b.com"]);
        assert_eq!(
            segment.rules[0].description.as_deref(),
            Some("Mar 14, 2024 at 05:23:45")
        );
    }

    #[test]
    fn test_segment_tolerates_missing_rules() {
        let segment: Segment = serde_json::from_str(r#"{"name": "empty"}"#).unwrap();
        assert!(segment.rules.is_empty());
    }

    #[test]
    fn test_patch_operation_serializes_lowercase_op() {
        let op = PatchOperation {
            op: PatchOp::Replace,
            path: RULE_PATH.to_string(),
            value: SegmentRule {
                clauses: vec![Clause {
                    attribute: "email".to_string(),
                    op: CLAUSE_OP.to_string(),
                    values: vec!["a.com".to_string()],
                    negate: false,
                }],
                description: Some("Mar 14, 2024 at 05:23:45".to_string()),
            },
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "replace");
        assert_eq!(json["path"], "/rules/0");
        assert_eq!(json["value"]["clauses"][0]["values"][0], "a.com");
        assert_eq!(json["value"]["description"], "Mar 14, 2024 at 05:23:45");
    }
}
