//! Delivery channel adapter traits.
//!
//! Each channel is a fallible send at the process boundary. Adapters are
//! constructed once and injected into the dispatcher, so tests can
//! substitute fakes that record or fail on demand.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::PushSubscription;

/// Outbound email adapter.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send one message. A failure is reported, never panicked.
    async fn send(&self, to: &str, subject: &str, text: &str, html: &str) -> Result<()>;
}

/// Outbound SMS adapter. Callers pass an already-normalized phone number
/// (no spaces, dashes, or parentheses).
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<()>;
}

/// Outcome of a push send. `Gone` means the subscription has expired at the
/// push service (404/410) and should be dropped from the user's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Sent,
    Gone,
}

/// Outbound Web Push adapter.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, subscription: &PushSubscription, payload: &str) -> Result<PushOutcome>;
}
