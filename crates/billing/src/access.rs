//! Access decision
//!
//! The single authority on whether a subscription record grants access.
//! Every protected request path must call this; the grace-period branching
//! must never be re-implemented at a call site.

use time::OffsetDateTime;

use karte_shared::SubscriptionStatus;

use crate::store::SubscriptionRecord;

/// Access decision for one subscriber, shaped for the check endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDecision {
    pub active: bool,
    pub status: SubscriptionStatus,
    pub expiry: Option<OffsetDateTime>,
}

/// True iff the record grants billing-active access at `now`.
///
/// Grants access when the status is `active` or `trialing`, or when a
/// `canceled` or `past_due` subscription still has a paid-for period running
/// (`current_period_end` strictly after `now`). No record means no access.
pub fn is_active(record: Option<&SubscriptionRecord>, now: OffsetDateTime) -> bool {
    let Some(record) = record else {
        return false;
    };

    match record.status {
        SubscriptionStatus::Active | SubscriptionStatus::Trialing => true,
        SubscriptionStatus::Canceled | SubscriptionStatus::PastDue => record
            .current_period_end
            .map(|end| end > now)
            .unwrap_or(false),
        SubscriptionStatus::Inactive => false,
    }
}

/// Full decision including the fields reported to callers
pub fn decide(record: Option<&SubscriptionRecord>, now: OffsetDateTime) -> AccessDecision {
    AccessDecision {
        active: is_active(record, now),
        status: record.map(|r| r.status).unwrap_or_default(),
        expiry: record.and_then(|r| r.current_period_end),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::Duration;

    fn record(status: SubscriptionStatus, period_end: Option<OffsetDateTime>) -> SubscriptionRecord {
        SubscriptionRecord {
            email: "user@example.com".to_string(),
            status,
            trial_end: None,
            current_period_end: period_end,
            cancel_at_period_end: false,
            canceled_at: None,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            plan_id: None,
            plan_name: None,
            last_synced_at: None,
            created_date: None,
            trial_warning_sent: false,
        }
    }

    #[test]
    fn absent_record_denies() {
        let now = OffsetDateTime::now_utc();
        assert!(!is_active(None, now));
        let decision = decide(None, now);
        assert!(!decision.active);
        assert_eq!(decision.status, SubscriptionStatus::Inactive);
        assert_eq!(decision.expiry, None);
    }

    #[test]
    fn active_and_trialing_grant_regardless_of_period_end() {
        let now = OffsetDateTime::now_utc();
        for status in [SubscriptionStatus::Active, SubscriptionStatus::Trialing] {
            assert!(is_active(Some(&record(status, None)), now));
            assert!(is_active(
                Some(&record(status, Some(now - Duration::days(1)))),
                now
            ));
        }
    }

    #[test]
    fn canceled_grants_until_period_end() {
        let now = OffsetDateTime::now_utc();
        let future = record(SubscriptionStatus::Canceled, Some(now + Duration::days(3)));
        let past = record(SubscriptionStatus::Canceled, Some(now - Duration::seconds(1)));
        let missing = record(SubscriptionStatus::Canceled, None);

        assert!(is_active(Some(&future), now));
        assert!(!is_active(Some(&past), now));
        assert!(!is_active(Some(&missing), now));
    }

    #[test]
    fn past_due_grants_until_period_end() {
        let now = OffsetDateTime::now_utc();
        let future = record(SubscriptionStatus::PastDue, Some(now + Duration::hours(1)));
        let past = record(SubscriptionStatus::PastDue, Some(now - Duration::hours(1)));

        assert!(is_active(Some(&future), now));
        assert!(!is_active(Some(&past), now));
    }

    #[test]
    fn period_end_exactly_now_denies() {
        // Strictly-after comparison: the boundary instant is already expired.
        let now = OffsetDateTime::now_utc();
        let boundary = record(SubscriptionStatus::Canceled, Some(now));
        assert!(!is_active(Some(&boundary), now));
    }

    #[test]
    fn inactive_denies() {
        let now = OffsetDateTime::now_utc();
        let rec = record(SubscriptionStatus::Inactive, Some(now + Duration::days(30)));
        assert!(!is_active(Some(&rec), now));
    }

    #[test]
    fn cancel_at_period_end_alone_does_not_deny() {
        let now = OffsetDateTime::now_utc();
        let mut rec = record(SubscriptionStatus::Active, Some(now + Duration::days(10)));
        rec.cancel_at_period_end = true;
        assert!(is_active(Some(&rec), now));
    }
}
