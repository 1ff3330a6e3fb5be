//! Best-effort webhook notifications.
//!
//! Every run reports its terminal outcome (and any advisory conditions
//! along the way) to a messaging webhook. Delivery is fire-and-forget:
//! a failed notification is logged at `warn` and never aborts the
//! pipeline.

use serde_json::json;
use snafu::prelude::*;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{BuildNotifierSnafu, NotifyError};

/// Webhook notifier handle.
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl Notifier {
    /// Create a notifier for the given webhook target.
    pub fn new(webhook_url: String) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context(BuildNotifierSnafu)?;

        Ok(Self {
            client,
            webhook_url,
        })
    }

    /// Post a plain-text message.
    pub async fn notify_text(&self, text: &str) {
        self.post(json!({ "text": text })).await;
    }

    /// Post a structured block message.
    pub async fn notify_blocks(&self, blocks: serde_json::Value) {
        self.post(json!({ "blocks": blocks })).await;
    }

    async fn post(&self, payload: serde_json::Value) {
        let result = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!("Notification delivered");
            }
            Ok(response) => {
                warn!(
                    "Notification rejected by webhook ({})",
                    response.status()
                );
            }
            Err(e) => {
                warn!("Failed to deliver notification: {}", e);
            }
        }
    }
}

/// Build the structured success message for a completed run.
pub fn success_blocks(new_domains: usize, watermark: &str) -> serde_json::Value {
    json!([
        {
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!(
                    "*Segment reconciliation complete*\nAdded {new_domains} new domains\nWatermark: {watermark}"
                )
            }
        }
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_blocks_shape() {
        let blocks = success_blocks(2, "Jan 02, 2024 at 12:30:45");
        assert_eq!(blocks[0]["type"], "section");
        let text = blocks[0]["text"]["text"].as_str().unwrap();
        assert!(text.contains("2 new domains"));
        assert!(text.contains("Jan 02, 2024 at 12:30:45"));
    }

    #[tokio::test]
    async fn test_notify_failure_is_swallowed() {
        // Nothing listens here; delivery fails and must not panic or error.
        let notifier = Notifier::new("http://127.0.0.1:9/webhook".to_string()).unwrap();
        notifier.notify_text("unreachable").await;
    }
}
