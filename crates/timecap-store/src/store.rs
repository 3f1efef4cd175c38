//! The typed capsule store.
//!
//! Wraps an injected [`Kv`] backend with the record shapes and index
//! bookkeeping the delivery core depends on. Capsules and users live in
//! hashes; the due index and per-user capsule index are sorted sets; push
//! subscriptions are a JSON list. Multi-key writes are ordered
//! record-then-index and are not atomic as a unit — the sweep self-heals
//! stray due entries rather than assuming they cannot happen.

use std::collections::HashMap;
use std::sync::Arc;

use timecap_core::error::{Result, TimecapError};
use timecap_core::types::{Capsule, CapsuleStatus, PushSubscription, User};
use uuid::Uuid;

use crate::keys;
use crate::kv::Kv;

#[derive(Clone)]
pub struct CapsuleStore {
    kv: Arc<dyn Kv>,
}

/// Partial preferences update; only set fields are written.
#[derive(Debug, Clone, Default)]
pub struct PreferencesPatch {
    pub notify_email: Option<bool>,
    pub notify_sms: Option<bool>,
    pub notify_push: Option<bool>,
    pub phone: Option<String>,
}

impl PreferencesPatch {
    pub fn is_empty(&self) -> bool {
        self.notify_email.is_none()
            && self.notify_sms.is_none()
            && self.notify_push.is_none()
            && self.phone.is_none()
    }
}

impl CapsuleStore {
    pub fn new(kv: Arc<dyn Kv>) -> Self {
        Self { kv }
    }

    // ── capsules ────────────────────────────────────────────────────────

    /// Write a new pending capsule: record, user index, due index, in that
    /// order. Answer validation is the caller's job.
    pub async fn create_capsule(
        &self,
        uid: &str,
        answers: Vec<String>,
        deliver_at: i64,
        interval: &str,
        now: i64,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let capsule = Capsule {
            id: id.clone(),
            uid: uid.to_string(),
            answers,
            interval: interval.to_string(),
            deliver_at,
            created_at: now,
            status: CapsuleStatus::Pending,
            return_answers: Vec::new(),
        };

        self.kv
            .hset(&keys::capsule(&id), &capsule_fields(&capsule))
            .await?;
        self.kv
            .zadd(&keys::user_capsules(uid), &id, now)
            .await?;
        self.kv.zadd(keys::DUE_INDEX, &id, deliver_at).await?;

        tracing::debug!("🔒 Capsule sealed: {id} (deliverAt={deliver_at})");
        Ok(id)
    }

    /// Write a fully-formed capsule (migration path): record, user index,
    /// and a due-index entry only while the capsule is still pending.
    pub async fn import_capsule(&self, capsule: &Capsule) -> Result<()> {
        self.kv
            .hset(&keys::capsule(&capsule.id), &capsule_fields(capsule))
            .await?;
        self.kv
            .zadd(
                &keys::user_capsules(&capsule.uid),
                &capsule.id,
                capsule.created_at,
            )
            .await?;
        if capsule.status == CapsuleStatus::Pending {
            self.kv
                .zadd(keys::DUE_INDEX, &capsule.id, capsule.deliver_at)
                .await?;
        }
        Ok(())
    }

    pub async fn get_capsule(&self, id: &str) -> Result<Option<Capsule>> {
        let hash = self.kv.hgetall(&keys::capsule(id)).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        capsule_from_hash(id, &hash).map(Some)
    }

    /// Terminal delivery transition: status flips to `delivered` and the
    /// due-index entry goes away. The record itself stays for history.
    pub async fn mark_delivered(&self, id: &str) -> Result<()> {
        self.kv
            .hset(
                &keys::capsule(id),
                &[("status", CapsuleStatus::Delivered.as_str().to_string())],
            )
            .await?;
        self.kv.zrem(keys::DUE_INDEX, id).await?;
        Ok(())
    }

    /// Store post-delivery reflections. Legal only once the capsule has
    /// been delivered; a pending capsule is a caller error.
    pub async fn record_return_answers(&self, id: &str, answers: Vec<String>) -> Result<()> {
        let capsule = self
            .get_capsule(id)
            .await?
            .ok_or_else(|| TimecapError::NotFound(format!("capsule {id}")))?;

        if capsule.status == CapsuleStatus::Pending {
            return Err(TimecapError::Validation(
                "capsule has not been delivered yet".into(),
            ));
        }

        self.kv
            .hset(
                &keys::capsule(id),
                &[
                    ("returnAnswers", serde_json::to_string(&answers)?),
                    ("status", CapsuleStatus::Returned.as_str().to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    /// All of a user's capsules, newest first, optionally filtered by
    /// status. Index entries whose record is gone are skipped.
    pub async fn list_capsules(
        &self,
        uid: &str,
        status: Option<CapsuleStatus>,
    ) -> Result<Vec<Capsule>> {
        let ids = self.kv.zrevrange_all(&keys::user_capsules(uid)).await?;
        let mut capsules = Vec::with_capacity(ids.len());
        for id in &ids {
            let hash = self.kv.hgetall(&keys::capsule(id)).await?;
            if hash.is_empty() {
                continue;
            }
            let capsule = capsule_from_hash(id, &hash)?;
            if status.is_none_or(|s| capsule.status == s) {
                capsules.push(capsule);
            }
        }
        Ok(capsules)
    }

    // ── due index (the Scanner reads here) ──────────────────────────────

    /// Every capsule id whose delivery time has elapsed, earliest first.
    /// Pure read; an empty result is the normal "nothing to do" outcome.
    pub async fn due_before(&self, now: i64) -> Result<Vec<String>> {
        self.kv.zrange_by_score(keys::DUE_INDEX, 0, now).await
    }

    /// Drop a due-index entry without touching the record. Used by the
    /// sweep to heal entries whose backing record has vanished.
    pub async fn remove_due_entry(&self, id: &str) -> Result<()> {
        self.kv.zrem(keys::DUE_INDEX, id).await
    }

    // ── users ───────────────────────────────────────────────────────────

    pub async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        let hash = self.kv.hgetall(&keys::user(uid)).await?;
        if hash.is_empty() {
            return Ok(None);
        }
        Ok(Some(user_from_hash(uid, &hash)))
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<String>> {
        self.kv.get(&keys::user_email(email)).await
    }

    /// Write a user record and, when an email is present, the
    /// email-to-uid lookup.
    pub async fn create_user(&self, user: &User) -> Result<()> {
        self.kv
            .hset(&keys::user(&user.id), &user_fields(user))
            .await?;
        if !user.email.is_empty() {
            self.kv
                .set(&keys::user_email(&user.email), &user.id)
                .await?;
        }
        Ok(())
    }

    pub async fn update_preferences(&self, uid: &str, patch: &PreferencesPatch) -> Result<()> {
        if patch.is_empty() {
            return Err(TimecapError::Validation("no valid fields to update".into()));
        }
        if self.get_user(uid).await?.is_none() {
            return Err(TimecapError::NotFound(format!("user {uid}")));
        }

        let mut fields: Vec<(&str, String)> = Vec::new();
        if let Some(v) = patch.notify_email {
            fields.push(("notifyEmail", v.to_string()));
        }
        if let Some(v) = patch.notify_sms {
            fields.push(("notifySms", v.to_string()));
        }
        if let Some(v) = patch.notify_push {
            fields.push(("notifyPush", v.to_string()));
        }
        if let Some(v) = &patch.phone {
            fields.push(("phone", v.trim().to_string()));
        }
        self.kv.hset(&keys::user(uid), &fields).await
    }

    // ── push subscriptions ──────────────────────────────────────────────

    /// Add a subscription unless one with the same endpoint already exists.
    pub async fn add_push_subscription(
        &self,
        uid: &str,
        subscription: &PushSubscription,
    ) -> Result<()> {
        let key = keys::user_push(uid);
        for raw in self.kv.lrange_all(&key).await? {
            if let Ok(existing) = serde_json::from_str::<PushSubscription>(&raw) {
                if existing.endpoint == subscription.endpoint {
                    return Ok(());
                }
            }
        }
        self.kv
            .rpush(&key, &serde_json::to_string(subscription)?)
            .await
    }

    /// Remove the subscription with the given endpoint, if present.
    pub async fn remove_push_subscription(&self, uid: &str, endpoint: &str) -> Result<()> {
        let key = keys::user_push(uid);
        for raw in self.kv.lrange_all(&key).await? {
            if let Ok(existing) = serde_json::from_str::<PushSubscription>(&raw) {
                if existing.endpoint == endpoint {
                    return self.kv.lrem(&key, &raw).await;
                }
            }
        }
        Ok(())
    }

    /// Parse out the user's subscriptions, skipping unreadable entries.
    pub async fn push_subscriptions(&self, uid: &str) -> Result<Vec<PushSubscription>> {
        let raws = self.kv.lrange_all(&keys::user_push(uid)).await?;
        Ok(raws
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect())
    }

    // ── legacy set (pre-migration format) ───────────────────────────────

    pub async fn legacy_exists(&self) -> Result<bool> {
        self.kv.exists(keys::LEGACY_SET).await
    }

    pub async fn legacy_consumed(&self) -> Result<bool> {
        self.kv.exists(keys::LEGACY_CONSUMED).await
    }

    /// Raw legacy members (JSON blobs), ascending delivery time.
    pub async fn legacy_all(&self) -> Result<Vec<String>> {
        self.kv.zrange_all(keys::LEGACY_SET).await
    }

    /// Raw legacy members due at or before `now`.
    pub async fn legacy_due_before(&self, now: i64) -> Result<Vec<String>> {
        self.kv.zrange_by_score(keys::LEGACY_SET, 0, now).await
    }

    /// Legacy delete-on-delivery: drop the set member and, when the blob
    /// carried an id, the per-object TTL key.
    pub async fn remove_legacy(&self, raw_member: &str, id: Option<&str>) -> Result<()> {
        self.kv.zrem(keys::LEGACY_SET, raw_member).await?;
        if let Some(id) = id {
            self.kv.del(&keys::capsule(id)).await?;
        }
        Ok(())
    }

    /// The migration commit point: atomically rename the legacy set to its
    /// consumed marker so a second migration run short-circuits.
    pub async fn consume_legacy_set(&self) -> Result<()> {
        self.kv.rename(keys::LEGACY_SET, keys::LEGACY_CONSUMED).await
    }
}

// ── hash codecs ─────────────────────────────────────────────────────────

fn capsule_fields(c: &Capsule) -> Vec<(&'static str, String)> {
    vec![
        ("uid", c.uid.clone()),
        (
            "answers",
            serde_json::to_string(&c.answers).unwrap_or_else(|_| "[]".into()),
        ),
        ("deliverAt", c.deliver_at.to_string()),
        ("interval", c.interval.clone()),
        ("createdAt", c.created_at.to_string()),
        ("status", c.status.as_str().to_string()),
        (
            "returnAnswers",
            if c.return_answers.is_empty() {
                String::new()
            } else {
                serde_json::to_string(&c.return_answers).unwrap_or_else(|_| "[]".into())
            },
        ),
    ]
}

fn capsule_from_hash(id: &str, hash: &HashMap<String, String>) -> Result<Capsule> {
    let uid = hash
        .get("uid")
        .cloned()
        .ok_or_else(|| TimecapError::Store(format!("capsule {id}: missing uid")))?;
    let answers: Vec<String> = match hash.get("answers") {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw)
            .map_err(|e| TimecapError::Store(format!("capsule {id}: bad answers: {e}")))?,
        _ => Vec::new(),
    };
    let deliver_at = parse_millis(hash.get("deliverAt"))
        .ok_or_else(|| TimecapError::Store(format!("capsule {id}: bad deliverAt")))?;
    let created_at = parse_millis(hash.get("createdAt")).unwrap_or(0);
    let return_answers: Vec<String> = match hash.get("returnAnswers") {
        Some(raw) if !raw.is_empty() => serde_json::from_str(raw).unwrap_or_default(),
        _ => Vec::new(),
    };

    Ok(Capsule {
        id: id.to_string(),
        uid,
        answers,
        interval: hash.get("interval").cloned().unwrap_or_default(),
        deliver_at,
        created_at,
        status: CapsuleStatus::parse(hash.get("status").map(String::as_str).unwrap_or("")),
        return_answers,
    })
}

fn user_fields(u: &User) -> Vec<(&'static str, String)> {
    vec![
        ("email", u.email.clone()),
        ("phone", u.phone.clone()),
        ("createdAt", u.created_at.to_string()),
        ("notifyEmail", u.notify_email.to_string()),
        ("notifySms", u.notify_sms.to_string()),
        ("notifyPush", u.notify_push.to_string()),
    ]
}

fn user_from_hash(uid: &str, hash: &HashMap<String, String>) -> User {
    User {
        id: uid.to_string(),
        email: hash.get("email").cloned().unwrap_or_default(),
        phone: hash.get("phone").cloned().unwrap_or_default(),
        notify_email: parse_flag(hash.get("notifyEmail")),
        notify_sms: parse_flag(hash.get("notifySms")),
        notify_push: parse_flag(hash.get("notifyPush")),
        created_at: parse_millis(hash.get("createdAt")).unwrap_or(0),
    }
}

fn parse_millis(value: Option<&String>) -> Option<i64> {
    value.and_then(|v| v.parse::<i64>().ok())
}

fn parse_flag(value: Option<&String>) -> bool {
    value.map(|v| v == "true").unwrap_or(false)
}
