//! Email adapter — async SMTP sending via lettre.
//!
//! Send-only: capsules go out, nothing comes back in. Supports Gmail,
//! Outlook, custom servers via STARTTLS relay.

use async_trait::async_trait;
use timecap_core::config::EmailConfig;
use timecap_core::error::{Result, TimecapError};
use timecap_core::traits::EmailSender;

/// SMTP email adapter.
pub struct SmtpEmailSender {
    config: EmailConfig,
}

impl SmtpEmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    async fn send_email(&self, to: &str, subject: &str, text: &str, html: &str) -> Result<()> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message as LettreMessage,
            message::{Mailbox, MultiPart},
            transport::smtp::authentication::Credentials,
        };

        let from_mailbox: Mailbox = self
            .config
            .from
            .parse()
            .map_err(|e| TimecapError::Channel(format!("Invalid from: {e}")))?;

        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| TimecapError::Channel(format!("Invalid to: {e}")))?;

        let email = LettreMessage::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .multipart(MultiPart::alternative_plain_html(
                text.to_string(),
                html.to_string(),
            ))
            .map_err(|e| TimecapError::Channel(format!("Build email: {e}")))?;

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.clone(),
        );

        let mailer =
            AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| TimecapError::Channel(format!("SMTP relay: {e}")))?
                .port(self.config.smtp_port)
                .credentials(creds)
                .build();

        mailer
            .send(email)
            .await
            .map_err(|e| TimecapError::Channel(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email sent to: {to}");
        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, to: &str, subject: &str, text: &str, html: &str) -> Result<()> {
        self.send_email(to, subject, text, html).await
    }
}
