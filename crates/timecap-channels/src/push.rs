//! Web Push adapter.
//!
//! Posts the JSON payload to the subscription's endpoint with a TTL header.
//! A 404 or 410 from the push service means the browser dropped the
//! subscription; that is reported as `Gone` so the caller can prune it
//! from the user's list instead of retrying forever.

use async_trait::async_trait;
use timecap_core::config::PushConfig;
use timecap_core::error::{Result, TimecapError};
use timecap_core::traits::{PushOutcome, PushSender};
use timecap_core::types::PushSubscription;

/// Web Push endpoint adapter.
pub struct WebPushSender {
    config: PushConfig,
    client: reqwest::Client,
}

impl WebPushSender {
    pub fn new(config: PushConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn vapid_public_key(&self) -> &str {
        &self.config.vapid_public_key
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(&self, subscription: &PushSubscription, payload: &str) -> Result<PushOutcome> {
        let response = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", self.config.ttl_secs.to_string())
            .header("Content-Type", "application/json")
            .body(payload.to_string())
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| TimecapError::Channel(format!("Push request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 404 || status.as_u16() == 410 {
            tracing::debug!("Push subscription expired: {}", subscription.endpoint);
            return Ok(PushOutcome::Gone);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TimecapError::Channel(format!(
                "Push service error {status}: {error_text}"
            )));
        }

        tracing::info!("📤 Push sent: {}", subscription.endpoint);
        Ok(PushOutcome::Sent)
    }
}
