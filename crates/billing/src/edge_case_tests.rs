// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing System
//!
//! Boundary conditions that cut across modules:
//! - Webhook signature verification (manual fallback path)
//! - Notification transition detection (trial conversion, cancellation
//!   scheduling dedup)
//! - Reconciliation derivation against prior records

#[cfg(test)]
mod signature_tests {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use crate::error::BillingError;
    use crate::webhooks::verify_signature_manual;

    const SECRET: &str = "whsec_test123secret456";

    fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
        let key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_is_accepted() {
        let payload = r#"{"id":"evt_1","type":"invoice.paid"}"#;
        let now = 1_770_000_000;
        let header = format!("t={},v1={}", now, sign(payload, SECRET, now));
        assert!(verify_signature_manual(payload, &header, SECRET, now).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let payload = r#"{"id":"evt_1","type":"invoice.paid"}"#;
        let now = 1_770_000_000;
        let header = format!("t={},v1={}", now, sign(payload, SECRET, now));
        let tampered = r#"{"id":"evt_1","type":"invoice.payment_failed"}"#;
        assert!(matches!(
            verify_signature_manual(tampered, &header, SECRET, now),
            Err(BillingError::WebhookSignatureInvalid)
        ));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_770_000_000;
        let header = format!("t={},v1={}", now, sign(payload, "whsec_other", now));
        assert!(verify_signature_manual(payload, &header, SECRET, now).is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let signed_at = 1_770_000_000;
        let header = format!("t={},v1={}", signed_at, sign(payload, SECRET, signed_at));
        // 301 seconds later: outside the replay tolerance
        assert!(verify_signature_manual(payload, &header, SECRET, signed_at + 301).is_err());
        // 299 seconds later: still inside
        assert!(verify_signature_manual(payload, &header, SECRET, signed_at + 299).is_ok());
    }

    #[test]
    fn missing_header_parts_are_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_770_000_000;
        assert!(verify_signature_manual(payload, "", SECRET, now).is_err());
        assert!(verify_signature_manual(payload, "t=1770000000", SECRET, now).is_err());
        assert!(verify_signature_manual(payload, "v1=deadbeef", SECRET, now).is_err());
    }
}

#[cfg(test)]
mod transition_tests {
    use karte_shared::SubscriptionStatus;
    use time::macros::datetime;

    use crate::store::SubscriptionRecord;
    use crate::webhooks::{cancellation_newly_scheduled, trial_just_converted};

    fn record(status: SubscriptionStatus, cancel_at_period_end: bool) -> SubscriptionRecord {
        SubscriptionRecord {
            email: "user@example.com".to_string(),
            status,
            trial_end: None,
            current_period_end: Some(datetime!(2026-09-01 00:00 UTC)),
            cancel_at_period_end,
            canceled_at: None,
            stripe_customer_id: Some("cus_123".to_string()),
            stripe_subscription_id: Some("sub_123".to_string()),
            plan_id: None,
            plan_name: None,
            last_synced_at: None,
            created_date: None,
            trial_warning_sent: false,
        }
    }

    #[test]
    fn trial_to_active_transition_is_detected() {
        let prior = record(SubscriptionStatus::Trialing, false);
        assert!(trial_just_converted(
            Some(&prior),
            SubscriptionStatus::Active
        ));
    }

    #[test]
    fn active_to_active_is_not_a_conversion() {
        let prior = record(SubscriptionStatus::Active, false);
        assert!(!trial_just_converted(
            Some(&prior),
            SubscriptionStatus::Active
        ));
    }

    #[test]
    fn conversion_requires_a_prior_record() {
        assert!(!trial_just_converted(None, SubscriptionStatus::Active));
    }

    #[test]
    fn cancellation_flip_is_detected_once() {
        let before = record(SubscriptionStatus::Active, false);
        assert!(cancellation_newly_scheduled(Some(&before), true));

        // Flag already stored as true: later updates must not re-notify.
        let after = record(SubscriptionStatus::Active, true);
        assert!(!cancellation_newly_scheduled(Some(&after), true));
    }

    #[test]
    fn clearing_the_flag_never_notifies() {
        let scheduled = record(SubscriptionStatus::Active, true);
        assert!(!cancellation_newly_scheduled(Some(&scheduled), false));
        let clear = record(SubscriptionStatus::Active, false);
        assert!(!cancellation_newly_scheduled(Some(&clear), false));
    }

    #[test]
    fn flag_without_prior_record_does_not_notify() {
        // No stored previous=false to confirm the transition against.
        assert!(!cancellation_newly_scheduled(None, true));
    }
}

#[cfg(test)]
mod reconciliation_tests {
    use karte_shared::SubscriptionStatus;
    use time::macros::datetime;

    use crate::access::is_active;
    use crate::store::SubscriptionRecord;
    use crate::subscriptions::{derive_update, SubscriptionView};

    #[test]
    fn past_due_with_future_period_end_keeps_access() {
        // The reconciliation writes the processor's past_due view; the grace
        // period keeps the subscriber active until the period actually ends.
        let now = datetime!(2026-08-07 00:00 UTC);
        let period_end = datetime!(2026-08-20 00:00 UTC);

        let view = SubscriptionView {
            subscription_id: "sub_123".to_string(),
            customer_id: Some("cus_123".to_string()),
            email: Some("user@example.com".to_string()),
            status: SubscriptionStatus::PastDue,
            current_period_end: Some(period_end),
            trial_end: None,
            cancel_at_period_end: false,
            canceled_at: None,
            plan_id: None,
            plan_name: None,
        };
        let update = derive_update(&view, Some(now));

        let record = SubscriptionRecord {
            email: "user@example.com".to_string(),
            status: update.status.unwrap(),
            trial_end: update.trial_end,
            current_period_end: update.current_period_end,
            cancel_at_period_end: update.cancel_at_period_end.unwrap(),
            canceled_at: update.canceled_at,
            stripe_customer_id: update.stripe_customer_id,
            stripe_subscription_id: update.stripe_subscription_id,
            plan_id: update.plan_id,
            plan_name: update.plan_name,
            last_synced_at: update.last_synced_at,
            created_date: None,
            trial_warning_sent: false,
        };

        assert!(is_active(Some(&record), now));
        assert!(!is_active(Some(&record), period_end));
    }
}
