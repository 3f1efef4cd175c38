//! The sweep: due-set scan plus channel fan-out dispatch.
//!
//! One sweep reads every capsule id whose delivery time has elapsed, fans
//! each one out across the owner's enabled channels, and marks it
//! delivered. Failures are contained at the smallest possible unit: a bad
//! channel never blocks the other channels, a bad capsule never aborts the
//! sweep. Only a failure to read the due index itself is fatal.
//!
//! Delivery is at-least-once: there is no claim step, so two overlapping
//! sweeps can both pick up the same capsule before either marks it
//! delivered. Once marked, a capsule is never swept again, even if some of
//! its channel sends failed (those failures are final and only counted).

use std::sync::Arc;

use timecap_core::error::{Result, TimecapError};
use timecap_core::traits::{EmailSender, PushOutcome, PushSender, SmsSender};
use timecap_core::types::{
    Capsule, DeliveryMethod, LegacyCapsule, SweepReport, User, normalize_phone,
};
use timecap_store::CapsuleStore;

use crate::message;

/// Scanner + dispatcher with injected store and channel adapters.
pub struct Sweeper {
    store: CapsuleStore,
    email: Arc<dyn EmailSender>,
    sms: Arc<dyn SmsSender>,
    push: Arc<dyn PushSender>,
}

impl Sweeper {
    pub fn new(
        store: CapsuleStore,
        email: Arc<dyn EmailSender>,
        sms: Arc<dyn SmsSender>,
        push: Arc<dyn PushSender>,
    ) -> Self {
        Self {
            store,
            email,
            sms,
            push,
        }
    }

    /// Run one full sweep at the given clock reading. Covers the current
    /// per-user model and, while the legacy global set still exists, the
    /// pre-migration format as well.
    pub async fn run(&self, now: i64) -> Result<SweepReport> {
        let mut report = self.sweep_current(now).await?;
        if self.store.legacy_exists().await? {
            report = report.merge(self.sweep_legacy(now).await?);
        }
        if report.delivered > 0 || report.errors > 0 {
            tracing::info!(
                "📬 Sweep complete: {} delivered, {} errors",
                report.delivered,
                report.errors
            );
        }
        Ok(report)
    }

    /// Operator-triggered immediate delivery of a single capsule,
    /// bypassing the due check but going through the same fan-out path.
    pub async fn deliver_now(&self, id: &str) -> Result<SweepReport> {
        let capsule = self
            .store
            .get_capsule(id)
            .await?
            .ok_or_else(|| TimecapError::NotFound(format!("capsule {id}")))?;
        let user = self
            .store
            .get_user(&capsule.uid)
            .await?
            .ok_or_else(|| TimecapError::NotFound(format!("user {}", capsule.uid)))?;

        let errors = self.fan_out(&capsule, &user).await;
        self.store.mark_delivered(&capsule.id).await?;
        Ok(SweepReport {
            delivered: 1,
            errors,
        })
    }

    async fn sweep_current(&self, now: i64) -> Result<SweepReport> {
        // Failure to read the due index is the one fatal error of a sweep.
        let due = self.store.due_before(now).await?;
        let mut report = SweepReport::default();

        for id in &due {
            let capsule = match self.store.get_capsule(id).await {
                Ok(Some(c)) => c,
                Ok(None) => {
                    // Stray index entry from an interrupted multi-key write.
                    // Drop it; nothing was lost and nothing is delivered.
                    tracing::warn!("🧹 Removing stale due entry for missing capsule {id}");
                    if let Err(e) = self.store.remove_due_entry(id).await {
                        tracing::error!("Failed to remove stale due entry {id}: {e}");
                        report.errors += 1;
                    }
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to read capsule {id}: {e}");
                    report.errors += 1;
                    continue;
                }
            };

            let user = match self.store.get_user(&capsule.uid).await {
                Ok(Some(u)) => u,
                Ok(None) => {
                    // The capsule payload would be silently lost if we
                    // dropped the due entry here. Leave it for a later
                    // sweep or an operator to sort out.
                    tracing::error!(
                        "Capsule {id} owner {} missing; keeping due entry",
                        capsule.uid
                    );
                    report.errors += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to read user {}: {e}", capsule.uid);
                    report.errors += 1;
                    continue;
                }
            };

            report.errors += self.fan_out(&capsule, &user).await;

            // Commit point: after this the capsule is never swept again.
            match self.store.mark_delivered(&capsule.id).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::error!("Failed to mark capsule {id} delivered: {e}");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    /// Attempt every enabled channel that has its contact prerequisite,
    /// independently. Returns the number of failed sends; the caller still
    /// marks the capsule delivered.
    async fn fan_out(&self, capsule: &Capsule, user: &User) -> u32 {
        let mut errors = 0;

        if user.notify_email && !user.email.is_empty() {
            let subject = message::email_subject(&capsule.interval);
            let text = message::email_text(&capsule.interval, &capsule.answers);
            let html = message::email_html(&capsule.interval, &capsule.answers);
            if let Err(e) = self.email.send(&user.email, &subject, &text, &html).await {
                tracing::error!("Email delivery failed for capsule {}: {e}", capsule.id);
                errors += 1;
            }
        }

        if user.notify_sms && !user.phone.is_empty() {
            let body = message::sms_body(&capsule.interval, &capsule.answers);
            let phone = normalize_phone(&user.phone);
            if let Err(e) = self.sms.send(&phone, &body).await {
                tracing::error!("SMS delivery failed for capsule {}: {e}", capsule.id);
                errors += 1;
            }
        }

        if user.notify_push {
            errors += self.push_fan_out(capsule, user).await;
        }

        errors
    }

    /// Push goes to every subscription the user has. An expired
    /// subscription is pruned, not counted as an error.
    async fn push_fan_out(&self, capsule: &Capsule, user: &User) -> u32 {
        let subscriptions = match self.store.push_subscriptions(&user.id).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::error!("Failed to read push subscriptions for {}: {e}", user.id);
                return 1;
            }
        };
        if subscriptions.is_empty() {
            return 0;
        }

        let payload = message::push_payload(&capsule.id, &capsule.interval);
        let mut errors = 0;
        for sub in &subscriptions {
            match self.push.send(sub, &payload).await {
                Ok(PushOutcome::Sent) => {}
                Ok(PushOutcome::Gone) => {
                    if let Err(e) = self
                        .store
                        .remove_push_subscription(&user.id, &sub.endpoint)
                        .await
                    {
                        tracing::warn!("Failed to prune expired subscription: {e}");
                    }
                }
                Err(e) => {
                    tracing::error!("Push delivery failed for capsule {}: {e}", capsule.id);
                    errors += 1;
                }
            }
        }
        errors
    }

    /// Pre-migration compatibility pass: legacy capsules embed their
    /// contact and method directly and are deleted on delivery rather
    /// than marked, matching the old lifecycle.
    async fn sweep_legacy(&self, now: i64) -> Result<SweepReport> {
        let due = self.store.legacy_due_before(now).await?;
        let mut report = SweepReport::default();

        for raw in &due {
            let legacy: LegacyCapsule = match serde_json::from_str(raw) {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("Failed to parse legacy capsule: {e}");
                    report.errors += 1;
                    continue;
                }
            };

            match self.send_legacy(&legacy).await {
                Ok(()) => {
                    if let Err(e) = self.store.remove_legacy(raw, legacy.id.as_deref()).await {
                        tracing::error!("Failed to remove delivered legacy capsule: {e}");
                        report.errors += 1;
                        continue;
                    }
                    report.delivered += 1;
                }
                Err(e) => {
                    // Stays in the legacy set; the next sweep retries.
                    tracing::error!("Legacy delivery failed: {e}");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    async fn send_legacy(&self, legacy: &LegacyCapsule) -> Result<()> {
        let answers = legacy.normalized_answers();
        let interval = legacy.interval_label();
        match legacy.method {
            DeliveryMethod::Email => {
                self.email
                    .send(
                        &legacy.contact,
                        &message::email_subject(interval),
                        &message::email_text(interval, &answers),
                        &message::email_html(interval, &answers),
                    )
                    .await
            }
            DeliveryMethod::Sms => {
                self.sms
                    .send(
                        &normalize_phone(&legacy.contact),
                        &message::sms_body(interval, &answers),
                    )
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use timecap_core::types::{CapsuleStatus, PushKeys, PushSubscription};
    use timecap_store::{Kv, MemoryKv, keys};

    #[derive(Default)]
    struct FakeEmail {
        sent: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl EmailSender for FakeEmail {
        async fn send(&self, to: &str, _s: &str, _t: &str, _h: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TimecapError::Channel("email down".into()));
            }
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeSms {
        sent: Mutex<Vec<String>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl SmsSender for FakeSms {
        async fn send(&self, to: &str, _body: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(TimecapError::Channel("sms down".into()));
            }
            self.sent.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakePush {
        sent: Mutex<Vec<String>>,
        gone: AtomicBool,
    }

    #[async_trait]
    impl PushSender for FakePush {
        async fn send(&self, sub: &PushSubscription, _payload: &str) -> Result<PushOutcome> {
            if self.gone.load(Ordering::SeqCst) {
                return Ok(PushOutcome::Gone);
            }
            self.sent.lock().unwrap().push(sub.endpoint.clone());
            Ok(PushOutcome::Sent)
        }
    }

    struct Harness {
        kv: Arc<MemoryKv>,
        store: CapsuleStore,
        email: Arc<FakeEmail>,
        sms: Arc<FakeSms>,
        push: Arc<FakePush>,
        sweeper: Sweeper,
    }

    fn harness() -> Harness {
        let kv = Arc::new(MemoryKv::new());
        let store = CapsuleStore::new(kv.clone());
        let email = Arc::new(FakeEmail::default());
        let sms = Arc::new(FakeSms::default());
        let push = Arc::new(FakePush::default());
        let sweeper = Sweeper::new(
            store.clone(),
            email.clone(),
            sms.clone(),
            push.clone(),
        );
        Harness {
            kv,
            store,
            email,
            sms,
            push,
            sweeper,
        }
    }

    async fn seed_user(store: &CapsuleStore, uid: &str, email: bool, sms: bool, push: bool) {
        store
            .create_user(&User {
                id: uid.to_string(),
                email: if email {
                    format!("{uid}@example.com")
                } else {
                    String::new()
                },
                phone: if sms { "+1 (555) 123-4567".into() } else { String::new() },
                notify_email: email,
                notify_sms: sms,
                notify_push: push,
                created_at: 1_000,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn due_capsule_is_delivered_once() {
        let h = harness();
        let now = 100_000;
        seed_user(&h.store, "u1", true, false, false).await;
        let id = h
            .store
            .create_capsule(
                "u1",
                vec!["A".into(), "B".into()],
                now - 1_000,
                "1 minute",
                now - 2_000,
            )
            .await
            .unwrap();

        let report = h.sweeper.run(now).await.unwrap();
        assert_eq!(report, SweepReport { delivered: 1, errors: 0 });
        assert_eq!(*h.email.sent.lock().unwrap(), vec!["u1@example.com"]);

        let capsule = h.store.get_capsule(&id).await.unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Delivered);

        // Second sweep finds nothing: the due entry is gone for good.
        let again = h.sweeper.run(now).await.unwrap();
        assert_eq!(again, SweepReport { delivered: 0, errors: 0 });
        assert_eq!(h.email.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn not_yet_due_capsule_is_untouched() {
        let h = harness();
        seed_user(&h.store, "u1", true, false, false).await;
        h.store
            .create_capsule("u1", vec!["A".into()], 50_000, "1 year", 1_000)
            .await
            .unwrap();

        let report = h.sweeper.run(49_999).await.unwrap();
        assert_eq!(report, SweepReport { delivered: 0, errors: 0 });
        assert!(h.email.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn channel_failure_does_not_block_other_channels() {
        let h = harness();
        let now = 100_000;
        seed_user(&h.store, "u1", true, true, false).await;
        h.email.fail.store(true, Ordering::SeqCst);

        let id = h
            .store
            .create_capsule("u1", vec!["A".into()], now - 1, "1 week", 1_000)
            .await
            .unwrap();

        let report = h.sweeper.run(now).await.unwrap();
        // Email failed, SMS went through, capsule still delivered, exactly
        // one error counted.
        assert_eq!(report, SweepReport { delivered: 1, errors: 1 });
        assert_eq!(*h.sms.sent.lock().unwrap(), vec!["+15551234567"]);
        let capsule = h.store.get_capsule(&id).await.unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Delivered);
    }

    #[tokio::test]
    async fn enabled_channel_without_contact_is_skipped() {
        let h = harness();
        let now = 100_000;
        // SMS enabled but no phone on file: skip silently.
        h.store
            .create_user(&User {
                id: "u1".into(),
                email: "u1@example.com".into(),
                phone: String::new(),
                notify_email: true,
                notify_sms: true,
                notify_push: false,
                created_at: 1_000,
            })
            .await
            .unwrap();
        h.store
            .create_capsule("u1", vec!["A".into()], now - 1, "1 week", 1_000)
            .await
            .unwrap();

        let report = h.sweeper.run(now).await.unwrap();
        assert_eq!(report, SweepReport { delivered: 1, errors: 0 });
        assert!(h.sms.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stray_due_entry_is_healed_without_counting() {
        let h = harness();
        h.kv.zadd(keys::DUE_INDEX, "ghost", 1).await.unwrap();

        let report = h.sweeper.run(100_000).await.unwrap();
        assert_eq!(report, SweepReport { delivered: 0, errors: 0 });

        // Healed: the entry does not come back on a later sweep.
        assert!(h.store.due_before(i64::MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_user_keeps_the_due_entry_for_retry() {
        let h = harness();
        let now = 100_000;
        let id = h
            .store
            .create_capsule("nobody", vec!["A".into()], now - 1, "1 week", 1_000)
            .await
            .unwrap();

        let report = h.sweeper.run(now).await.unwrap();
        assert_eq!(report, SweepReport { delivered: 0, errors: 1 });

        // Unlike the missing-capsule case, the entry survives so a later
        // sweep can retry once the inconsistency is repaired.
        assert_eq!(h.store.due_before(now).await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn expired_push_subscription_is_pruned_not_counted() {
        let h = harness();
        let now = 100_000;
        seed_user(&h.store, "u1", false, false, true).await;
        h.store
            .add_push_subscription(
                "u1",
                &PushSubscription {
                    endpoint: "https://push.example/x".into(),
                    keys: PushKeys::default(),
                },
            )
            .await
            .unwrap();
        h.push.gone.store(true, Ordering::SeqCst);

        h.store
            .create_capsule("u1", vec!["A".into()], now - 1, "1 week", 1_000)
            .await
            .unwrap();

        let report = h.sweeper.run(now).await.unwrap();
        assert_eq!(report, SweepReport { delivered: 1, errors: 0 });
        assert!(h.store.push_subscriptions("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn push_goes_to_every_subscription() {
        let h = harness();
        let now = 100_000;
        seed_user(&h.store, "u1", false, false, true).await;
        for n in 0..2 {
            h.store
                .add_push_subscription(
                    "u1",
                    &PushSubscription {
                        endpoint: format!("https://push.example/{n}"),
                        keys: PushKeys::default(),
                    },
                )
                .await
                .unwrap();
        }
        h.store
            .create_capsule("u1", vec!["A".into()], now - 1, "1 week", 1_000)
            .await
            .unwrap();

        let report = h.sweeper.run(now).await.unwrap();
        assert_eq!(report, SweepReport { delivered: 1, errors: 0 });
        assert_eq!(h.push.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn legacy_capsules_are_sent_from_embedded_contact_and_deleted() {
        let h = harness();
        let now = 100_000;
        let raw = serde_json::json!({
            "id": "legacy-1",
            "contact": "old@example.com",
            "method": "email",
            "belief": "X",
            "deliverAt": now - 1,
            "interval": "6 months",
        })
        .to_string();
        h.kv.zadd(keys::LEGACY_SET, &raw, now - 1).await.unwrap();

        let report = h.sweeper.run(now).await.unwrap();
        assert_eq!(report, SweepReport { delivered: 1, errors: 0 });
        assert_eq!(*h.email.sent.lock().unwrap(), vec!["old@example.com"]);

        // Legacy lifecycle: deleted on delivery, nothing left behind.
        assert!(h.store.legacy_due_before(i64::MAX).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_legacy_send_stays_for_the_next_sweep() {
        let h = harness();
        let now = 100_000;
        let raw = serde_json::json!({
            "contact": "+1 555-000-1111",
            "method": "sms",
            "answers": ["A"],
            "deliverAt": now - 1,
        })
        .to_string();
        h.kv.zadd(keys::LEGACY_SET, &raw, now - 1).await.unwrap();
        h.sms.fail.store(true, Ordering::SeqCst);

        let report = h.sweeper.run(now).await.unwrap();
        assert_eq!(report, SweepReport { delivered: 0, errors: 1 });

        h.sms.fail.store(false, Ordering::SeqCst);
        let retry = h.sweeper.run(now).await.unwrap();
        assert_eq!(retry, SweepReport { delivered: 1, errors: 0 });
        assert_eq!(*h.sms.sent.lock().unwrap(), vec!["+15550001111"]);
    }

    #[tokio::test]
    async fn unparseable_legacy_record_does_not_abort_the_sweep() {
        let h = harness();
        let now = 100_000;
        h.kv.zadd(keys::LEGACY_SET, "not json", now - 2)
            .await
            .unwrap();
        let good = serde_json::json!({
            "contact": "ok@example.com",
            "method": "email",
            "belief": "fine",
            "deliverAt": now - 1,
        })
        .to_string();
        h.kv.zadd(keys::LEGACY_SET, &good, now - 1).await.unwrap();

        let report = h.sweeper.run(now).await.unwrap();
        assert_eq!(report, SweepReport { delivered: 1, errors: 1 });
    }

    #[tokio::test]
    async fn deliver_now_dispatches_a_single_capsule() {
        let h = harness();
        let now = 100_000;
        seed_user(&h.store, "u1", true, false, false).await;
        // Not yet due: deliver_now still sends it.
        let id = h
            .store
            .create_capsule("u1", vec!["A".into()], now + 999_999, "10 years", 1_000)
            .await
            .unwrap();

        let report = h.sweeper.deliver_now(&id).await.unwrap();
        assert_eq!(report, SweepReport { delivered: 1, errors: 0 });
        let capsule = h.store.get_capsule(&id).await.unwrap().unwrap();
        assert_eq!(capsule.status, CapsuleStatus::Delivered);
        assert!(h.store.due_before(i64::MAX).await.unwrap().is_empty());
    }
}
