//! # TimeCap Channels
//! Concrete delivery channel adapters. Each one implements the matching
//! trait from `timecap-core::traits` and is injected into the dispatcher.

pub mod email;
pub mod push;
pub mod sms;

pub use email::SmtpEmailSender;
pub use push::WebPushSender;
pub use sms::TwilioSmsSender;
