//! One-shot migration from the legacy global capsule set to the per-user
//! model.
//!
//! Legacy records carry their contact inline; the migration synthesizes a
//! user per distinct contact (reusing an existing account when the email
//! lookup matches), rewrites each record as a per-user capsule, and finally
//! renames the legacy set to its consumed marker. The rename is the commit
//! point and the idempotence sentinel: a second run sees the marker and
//! returns a zero report without touching anything.

use std::collections::HashMap;

use timecap_core::error::{Result, TimecapError};
use timecap_core::types::{
    Capsule, CapsuleStatus, DeliveryMethod, LegacyCapsule, MigrationReport, User,
};
use timecap_store::CapsuleStore;
use uuid::Uuid;

pub struct Migrator {
    store: CapsuleStore,
}

impl Migrator {
    pub fn new(store: CapsuleStore) -> Self {
        Self { store }
    }

    /// Run the migration against the clock reading `now`. Records whose
    /// delivery time has already passed become `delivered` rather than
    /// re-entering the due index.
    pub async fn run(&self, now: i64) -> Result<MigrationReport> {
        if self.store.legacy_consumed().await? {
            tracing::info!("⏭️  Migration already ran; nothing to do");
            return Ok(MigrationReport::default());
        }
        if !self.store.legacy_exists().await? {
            tracing::info!("⏭️  No legacy capsule set found; nothing to migrate");
            return Ok(MigrationReport::default());
        }

        let raws = self.store.legacy_all().await?;
        tracing::info!("🚚 Migrating {} legacy capsules", raws.len());

        let mut report = MigrationReport::default();
        // contact string -> uid, so every capsule from the same contact
        // lands under one user.
        let mut owners: HashMap<String, String> = HashMap::new();

        for raw in &raws {
            match self.migrate_one(raw, now, &mut owners).await {
                Ok(()) => report.migrated += 1,
                Err(e) => {
                    tracing::error!("Failed to migrate legacy capsule: {e}");
                    report.errors += 1;
                }
            }
        }
        report.users = owners.len() as u32;

        // Commit point. After the rename the sweep stops reading the legacy
        // set and a re-run short-circuits on the consumed marker.
        self.store.consume_legacy_set().await?;
        tracing::info!(
            "✅ Migration complete: {} capsules, {} users, {} errors",
            report.migrated,
            report.users,
            report.errors
        );
        Ok(report)
    }

    async fn migrate_one(
        &self,
        raw: &str,
        now: i64,
        owners: &mut HashMap<String, String>,
    ) -> Result<()> {
        let legacy: LegacyCapsule = serde_json::from_str(raw)?;
        let uid = self.resolve_owner(&legacy, now, owners).await?;

        let deliver_at = legacy.deliver_at.unwrap_or(now);
        let status = if deliver_at <= now {
            CapsuleStatus::Delivered
        } else {
            CapsuleStatus::Pending
        };

        let capsule = Capsule {
            id: legacy
                .id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            uid,
            answers: legacy.normalized_answers(),
            interval: legacy.interval_label().to_string(),
            deliver_at,
            created_at: legacy.created_at.unwrap_or(now),
            status,
            return_answers: Vec::new(),
        };
        self.store.import_capsule(&capsule).await
    }

    /// Map a legacy contact to a uid: memoized within the run, matched
    /// against existing accounts by email, otherwise a fresh user whose
    /// notification toggle mirrors the legacy delivery method.
    async fn resolve_owner(
        &self,
        legacy: &LegacyCapsule,
        now: i64,
        owners: &mut HashMap<String, String>,
    ) -> Result<String> {
        let contact = legacy.contact.trim();
        if contact.is_empty() {
            return Err(TimecapError::Validation(
                "legacy capsule has no contact".into(),
            ));
        }
        if let Some(uid) = owners.get(contact) {
            return Ok(uid.clone());
        }

        let uid = match legacy.method {
            DeliveryMethod::Email => {
                match self.store.find_user_by_email(contact).await? {
                    Some(existing) => existing,
                    None => {
                        let uid = Uuid::new_v4().to_string();
                        self.store
                            .create_user(&User::from_email(&uid, contact, now))
                            .await?;
                        uid
                    }
                }
            }
            DeliveryMethod::Sms => {
                let uid = Uuid::new_v4().to_string();
                self.store
                    .create_user(&User {
                        id: uid.clone(),
                        email: String::new(),
                        phone: contact.to_string(),
                        notify_email: false,
                        notify_sms: true,
                        notify_push: false,
                        created_at: now,
                    })
                    .await?;
                uid
            }
        };

        owners.insert(contact.to_string(), uid.clone());
        Ok(uid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use timecap_store::{Kv, MemoryKv, keys};

    struct Harness {
        kv: Arc<MemoryKv>,
        store: CapsuleStore,
        migrator: Migrator,
    }

    fn harness() -> Harness {
        let kv = Arc::new(MemoryKv::new());
        let store = CapsuleStore::new(kv.clone());
        let migrator = Migrator::new(store.clone());
        Harness {
            kv,
            store,
            migrator,
        }
    }

    async fn seed_legacy(kv: &MemoryKv, value: serde_json::Value, score: i64) {
        kv.zadd(keys::LEGACY_SET, &value.to_string(), score)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn migrates_and_is_idempotent() {
        let h = harness();
        let now = 100_000;
        seed_legacy(
            &h.kv,
            serde_json::json!({
                "contact": "a@example.com",
                "method": "email",
                "belief": "X",
                "deliverAt": now + 50_000,
                "createdAt": 1_000,
                "interval": "1 year",
            }),
            now + 50_000,
        )
        .await;

        let report = h.migrator.run(now).await.unwrap();
        assert_eq!(
            report,
            MigrationReport {
                migrated: 1,
                errors: 0,
                users: 1
            }
        );

        // The set was renamed; both the sweep source and a second run see
        // nothing.
        assert!(!h.store.legacy_exists().await.unwrap());
        assert!(h.store.legacy_consumed().await.unwrap());
        let again = h.migrator.run(now).await.unwrap();
        assert_eq!(again, MigrationReport::default());
    }

    #[tokio::test]
    async fn pending_legacy_capsule_enters_the_due_index() {
        let h = harness();
        let now = 100_000;
        seed_legacy(
            &h.kv,
            serde_json::json!({
                "contact": "a@example.com",
                "belief": "future",
                "deliverAt": now + 9_000,
            }),
            now + 9_000,
        )
        .await;

        h.migrator.run(now).await.unwrap();

        let due = h.store.due_before(now + 9_000).await.unwrap();
        assert_eq!(due.len(), 1);
        let capsule = h.store.get_capsule(&due[0]).await.unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Pending);
        assert_eq!(capsule.answers, vec!["future"]);

        // The owner exists and can receive it.
        let uid = h
            .store
            .find_user_by_email("a@example.com")
            .await
            .unwrap()
            .unwrap();
        let user = h.store.get_user(&uid).await.unwrap().unwrap();
        assert!(user.notify_email);
    }

    #[tokio::test]
    async fn already_elapsed_capsule_is_marked_delivered_not_redelivered() {
        let h = harness();
        let now = 100_000;
        seed_legacy(
            &h.kv,
            serde_json::json!({
                "contact": "a@example.com",
                "belief": "past",
                "deliverAt": now - 5_000,
            }),
            now - 5_000,
        )
        .await;

        h.migrator.run(now).await.unwrap();

        // Not in the due index: delivery happened (or was missed) under the
        // old model and must not repeat under the new one.
        assert!(h.store.due_before(i64::MAX).await.unwrap().is_empty());
        let uid = h
            .store
            .find_user_by_email("a@example.com")
            .await
            .unwrap()
            .unwrap();
        let capsules = h.store.list_capsules(&uid, None).await.unwrap();
        assert_eq!(capsules.len(), 1);
        assert_eq!(capsules[0].status, CapsuleStatus::Delivered);
    }

    #[tokio::test]
    async fn same_contact_maps_to_one_user() {
        let h = harness();
        let now = 100_000;
        for i in 0..3 {
            seed_legacy(
                &h.kv,
                serde_json::json!({
                    "contact": "a@example.com",
                    "belief": format!("b{i}"),
                    "deliverAt": now + 1_000 + i,
                }),
                now + 1_000 + i,
            )
            .await;
        }

        let report = h.migrator.run(now).await.unwrap();
        assert_eq!(report.migrated, 3);
        assert_eq!(report.users, 1);

        let uid = h
            .store
            .find_user_by_email("a@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.store.list_capsules(&uid, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn existing_account_is_reused_for_matching_email() {
        let h = harness();
        let now = 100_000;
        h.store
            .create_user(&User::from_email("u-existing", "a@example.com", 1_000))
            .await
            .unwrap();
        seed_legacy(
            &h.kv,
            serde_json::json!({
                "contact": "a@example.com",
                "belief": "X",
                "deliverAt": now + 1_000,
            }),
            now + 1_000,
        )
        .await;

        let report = h.migrator.run(now).await.unwrap();
        assert_eq!(report.users, 1);
        assert_eq!(
            h.store
                .list_capsules("u-existing", None)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn sms_contact_gets_a_phone_user_with_sms_enabled() {
        let h = harness();
        let now = 100_000;
        seed_legacy(
            &h.kv,
            serde_json::json!({
                "contact": "+1 555-000-1111",
                "method": "sms",
                "belief": "X",
                "deliverAt": now + 1_000,
            }),
            now + 1_000,
        )
        .await;

        h.migrator.run(now).await.unwrap();

        let due = h.store.due_before(now + 1_000).await.unwrap();
        let capsule = h.store.get_capsule(&due[0]).await.unwrap().unwrap();
        let user = h.store.get_user(&capsule.uid).await.unwrap().unwrap();
        assert_eq!(user.phone, "+1 555-000-1111");
        assert!(user.notify_sms);
        assert!(!user.notify_email);
    }

    #[tokio::test]
    async fn bad_record_is_counted_and_skipped() {
        let h = harness();
        let now = 100_000;
        h.kv.zadd(keys::LEGACY_SET, "not json", 1).await.unwrap();
        seed_legacy(
            &h.kv,
            serde_json::json!({
                "contact": "ok@example.com",
                "belief": "fine",
                "deliverAt": now + 1_000,
            }),
            now + 1_000,
        )
        .await;

        let report = h.migrator.run(now).await.unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(report.errors, 1);
        // The run still commits: bad records are lost, not retried forever.
        assert!(h.store.legacy_consumed().await.unwrap());
    }

    #[tokio::test]
    async fn migrated_pending_capsule_is_swept_when_due() {
        use std::sync::Mutex;
        use async_trait::async_trait;
        use timecap_core::traits::{EmailSender, PushOutcome, PushSender, SmsSender};
        use timecap_core::types::{PushSubscription, SweepReport};

        #[derive(Default)]
        struct RecordingEmail {
            sent: Mutex<Vec<String>>,
        }
        #[async_trait]
        impl EmailSender for RecordingEmail {
            async fn send(&self, to: &str, _: &str, _: &str, _: &str) -> timecap_core::error::Result<()> {
                self.sent.lock().unwrap().push(to.to_string());
                Ok(())
            }
        }
        struct NoSms;
        #[async_trait]
        impl SmsSender for NoSms {
            async fn send(&self, _: &str, _: &str) -> timecap_core::error::Result<()> {
                Ok(())
            }
        }
        struct NoPush;
        #[async_trait]
        impl PushSender for NoPush {
            async fn send(&self, _: &PushSubscription, _: &str) -> timecap_core::error::Result<PushOutcome> {
                Ok(PushOutcome::Sent)
            }
        }

        let h = harness();
        let now = 100_000;
        seed_legacy(
            &h.kv,
            serde_json::json!({
                "contact": "a@example.com",
                "belief": "soon",
                "deliverAt": now + 5_000,
                "interval": "1 week",
            }),
            now + 5_000,
        )
        .await;

        h.migrator.run(now).await.unwrap();

        // After migration the legacy set is gone and the capsule rides the
        // normal per-user pipeline end to end.
        let email = Arc::new(RecordingEmail::default());
        let sweeper = crate::Sweeper::new(
            h.store.clone(),
            email.clone(),
            Arc::new(NoSms),
            Arc::new(NoPush),
        );

        let early = sweeper.run(now).await.unwrap();
        assert_eq!(early, SweepReport { delivered: 0, errors: 0 });

        let due = sweeper.run(now + 5_000).await.unwrap();
        assert_eq!(due, SweepReport { delivered: 1, errors: 0 });
        assert_eq!(*email.sent.lock().unwrap(), vec!["a@example.com"]);
    }

    #[tokio::test]
    async fn missing_legacy_set_is_a_zero_report() {
        let h = harness();
        let report = h.migrator.run(100_000).await.unwrap();
        assert_eq!(report, MigrationReport::default());
        assert!(!h.store.legacy_consumed().await.unwrap());
    }
}
