//! Logical key layout shared by every backend.

/// Global due index: capsule id scored by delivery time.
pub const DUE_INDEX: &str = "capsules:due";

/// Legacy global sorted set of JSON capsule blobs, scored by delivery time.
pub const LEGACY_SET: &str = "capsules";

/// Post-migration name of the legacy set. Its existence is the migration
/// sentinel: once the rename has happened, migration is a no-op.
pub const LEGACY_CONSUMED: &str = "capsules:legacy";

pub fn capsule(id: &str) -> String {
    format!("capsule:{id}")
}

pub fn user(uid: &str) -> String {
    format!("user:{uid}")
}

/// Email-to-uid lookup. Emails are lowercased before keying.
pub fn user_email(email: &str) -> String {
    format!("user:email:{}", email.to_lowercase())
}

/// Per-user capsule index, scored by creation time.
pub fn user_capsules(uid: &str) -> String {
    format!("user:{uid}:capsules")
}

/// Per-user push subscription list.
pub fn user_push(uid: &str) -> String {
    format!("user:{uid}:push")
}
