//! Domain types — users, capsules, and the two storage generations.
//!
//! Everything that comes off the wire or out of the store is parsed into
//! these canonical shapes immediately, so the rest of the pipeline never
//! branches on storage format again.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TimecapError};

/// Upper bound on answers per capsule.
pub const MAX_ANSWERS: usize = 3;
/// Upper bound on a single answer, in characters.
pub const MAX_ANSWER_CHARS: usize = 2000;

/// A registered user and their notification preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    /// Email address; empty string when unknown.
    #[serde(default)]
    pub email: String,
    /// Phone number as entered; empty string when unknown.
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub notify_email: bool,
    #[serde(default)]
    pub notify_sms: bool,
    #[serde(default)]
    pub notify_push: bool,
    /// Epoch milliseconds.
    pub created_at: i64,
}

impl User {
    /// A fresh user created from a verified email address.
    pub fn from_email(id: &str, email: &str, created_at: i64) -> Self {
        Self {
            id: id.to_string(),
            email: email.to_lowercase(),
            phone: String::new(),
            notify_email: true,
            notify_sms: false,
            notify_push: false,
            created_at,
        }
    }
}

/// Capsule lifecycle. Transitions only move forward:
/// `Pending → Delivered → Returned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapsuleStatus {
    Pending,
    Delivered,
    Returned,
}

impl CapsuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Returned => "returned",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "delivered" => Self::Delivered,
            "returned" => Self::Returned,
            _ => Self::Pending,
        }
    }
}

/// A sealed capsule in the current per-user model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capsule {
    pub id: String,
    /// Owning user id.
    pub uid: String,
    /// 1–3 answer strings, each at most [`MAX_ANSWER_CHARS`] characters.
    pub answers: Vec<String>,
    /// Free-text interval label ("1 year"); never parsed.
    pub interval: String,
    /// Delivery timestamp, epoch milliseconds. Fixed at creation.
    pub deliver_at: i64,
    /// Creation timestamp, epoch milliseconds.
    pub created_at: i64,
    pub status: CapsuleStatus,
    /// Reflections recorded after delivery.
    #[serde(default)]
    pub return_answers: Vec<String>,
}

/// Validate an answer set against the 1–3 / 2000-char rules and return the
/// trimmed copies. Used by the gateway before any store mutation.
pub fn validate_answers(answers: &[String]) -> Result<Vec<String>> {
    if answers.is_empty() || answers.len() > MAX_ANSWERS {
        return Err(TimecapError::Validation(format!(
            "answers must contain 1-{MAX_ANSWERS} entries"
        )));
    }
    let mut trimmed = Vec::with_capacity(answers.len());
    for a in answers {
        let t = a.trim();
        if t.is_empty() {
            return Err(TimecapError::Validation(
                "each answer must be a non-empty string".into(),
            ));
        }
        if a.chars().count() > MAX_ANSWER_CHARS {
            return Err(TimecapError::Validation(format!(
                "answer text too long (max {MAX_ANSWER_CHARS} characters each)"
            )));
        }
        trimmed.push(t.to_string());
    }
    Ok(trimmed)
}

/// Legacy contact method — the pre-migration model had no users, only a
/// contact value and how to reach it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    Email,
    Sms,
}

/// A capsule in the legacy single-global-set format: one JSON blob per
/// member, contact info embedded, no user relation. Older records carry a
/// single `belief` string instead of an `answers` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyCapsule {
    #[serde(default)]
    pub id: Option<String>,
    pub contact: String,
    #[serde(default = "default_method")]
    pub method: DeliveryMethod,
    #[serde(default)]
    pub belief: Option<String>,
    #[serde(default)]
    pub answers: Option<Vec<String>>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(rename = "deliverAt", default)]
    pub deliver_at: Option<i64>,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<i64>,
}

fn default_method() -> DeliveryMethod {
    DeliveryMethod::Email
}

impl LegacyCapsule {
    /// Normalize the duck-typed payload: `answers` wins, a lone `belief`
    /// becomes a one-element sequence, neither yields an empty set.
    pub fn normalized_answers(&self) -> Vec<String> {
        if let Some(answers) = &self.answers {
            return answers.clone();
        }
        match &self.belief {
            Some(b) => vec![b.clone()],
            None => Vec::new(),
        }
    }

    pub fn interval_label(&self) -> &str {
        self.interval.as_deref().unwrap_or("unknown")
    }
}

/// A browser push subscription descriptor. The endpoint doubles as the
/// de-duplication and removal key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(default)]
    pub keys: PushKeys,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushKeys {
    #[serde(default)]
    pub p256dh: String,
    #[serde(default)]
    pub auth: String,
}

/// Result of one sweep invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub delivered: u32,
    pub errors: u32,
}

impl SweepReport {
    pub fn merge(self, other: SweepReport) -> SweepReport {
        SweepReport {
            delivered: self.delivered + other.delivered,
            errors: self.errors + other.errors,
        }
    }
}

/// Result of one migration invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub migrated: u32,
    pub errors: u32,
    pub users: u32,
}

/// Strip spaces, dashes, and parentheses from a phone number before handing
/// it to the SMS adapter.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn belief_normalizes_to_single_answer() {
        let legacy: LegacyCapsule = serde_json::from_str(
            r#"{"contact":"a@b.com","method":"email","belief":"X","deliverAt":123}"#,
        )
        .unwrap();
        assert_eq!(legacy.normalized_answers(), vec!["X".to_string()]);
        assert_eq!(legacy.method, DeliveryMethod::Email);
    }

    #[test]
    fn answers_take_precedence_over_belief() {
        let legacy: LegacyCapsule = serde_json::from_str(
            r#"{"contact":"a@b.com","belief":"old","answers":["new1","new2"]}"#,
        )
        .unwrap();
        assert_eq!(legacy.normalized_answers(), vec!["new1", "new2"]);
    }

    #[test]
    fn missing_method_defaults_to_email() {
        let legacy: LegacyCapsule =
            serde_json::from_str(r#"{"contact":"a@b.com"}"#).unwrap();
        assert_eq!(legacy.method, DeliveryMethod::Email);
        assert!(legacy.normalized_answers().is_empty());
    }

    #[test]
    fn status_only_parses_known_values() {
        assert_eq!(CapsuleStatus::parse("delivered"), CapsuleStatus::Delivered);
        assert_eq!(CapsuleStatus::parse("returned"), CapsuleStatus::Returned);
        assert_eq!(CapsuleStatus::parse(""), CapsuleStatus::Pending);
        assert_eq!(CapsuleStatus::parse("garbage"), CapsuleStatus::Pending);
    }

    #[test]
    fn validate_answers_enforces_bounds() {
        assert!(validate_answers(&[]).is_err());
        assert!(validate_answers(&vec!["a".into(); 4]).is_err());
        assert!(validate_answers(&["   ".into()]).is_err());
        assert!(validate_answers(&["x".repeat(2001)]).is_err());

        let ok = validate_answers(&["  hello  ".into(), "world".into()]).unwrap();
        assert_eq!(ok, vec!["hello", "world"]);
    }

    #[test]
    fn phone_normalization_strips_formatting() {
        assert_eq!(normalize_phone("+1 (555) 123-4567"), "+15551234567");
        assert_eq!(normalize_phone("+15551234567"), "+15551234567");
    }
}
