//! SMS adapter — Twilio Messages API.
//!
//! One POST per message, HTTP basic auth with account SID + auth token.
//! Callers hand over an already-normalized destination number.

use async_trait::async_trait;
use timecap_core::config::SmsConfig;
use timecap_core::error::{Result, TimecapError};
use timecap_core::traits::SmsSender;

/// Twilio SMS adapter.
pub struct TwilioSmsSender {
    config: SmsConfig,
    client: reqwest::Client,
}

impl TwilioSmsSender {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SmsSender for TwilioSmsSender {
    async fn send(&self, to: &str, body: &str) -> Result<()> {
        if self.config.account_sid.is_empty() || self.config.auth_token.is_empty() {
            return Err(TimecapError::Channel("Twilio not configured".into()));
        }

        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        );

        let params = [
            ("To", to),
            ("From", self.config.from_number.as_str()),
            ("Body", body),
        ];

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&params)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| TimecapError::Channel(format!("Twilio request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TimecapError::Channel(format!(
                "Twilio API error {status}: {error_text}"
            )));
        }

        tracing::info!("📤 SMS sent to: {to}");
        Ok(())
    }
}
