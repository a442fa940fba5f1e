//! Subscription state derivation and reconciliation
//!
//! The processor is the source of truth. Webhooks apply its view on the fast
//! path; [`SubscriptionService::sync_all`] pages through every subscription
//! it knows and overwrites the local cache, closing any webhook delivery
//! gaps. Both paths derive the stored fields through the same
//! [`derive_update`] routine.

use serde::Serialize;
use stripe::{ListSubscriptions, Subscription, SubscriptionId, SubscriptionStatusFilter};
use time::OffsetDateTime;

use karte_shared::SubscriptionStatus;

use crate::client::StripeClient;
use crate::error::BillingResult;
use crate::store::{RecordStore, SubscriptionUpdate};

/// The processor-side subscription fields this system mirrors
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionView {
    pub subscription_id: String,
    pub customer_id: Option<String>,
    /// Present only when the customer object was expanded or embedded
    pub email: Option<String>,
    pub status: SubscriptionStatus,
    pub current_period_end: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    pub plan_id: Option<String>,
    pub plan_name: Option<String>,
}

impl From<&Subscription> for SubscriptionView {
    fn from(sub: &Subscription) -> Self {
        let (customer_id, email) = match &sub.customer {
            stripe::Expandable::Id(id) => (Some(id.to_string()), None),
            stripe::Expandable::Object(c) => (Some(c.id.to_string()), c.email.clone()),
        };
        let price = sub.items.data.first().and_then(|item| item.price.as_ref());
        let plan_name = price.and_then(|p| {
            p.nickname
                .clone()
                .or_else(|| p.product.as_ref().map(|product| product.id().to_string()))
        });

        Self {
            subscription_id: sub.id.to_string(),
            customer_id,
            email,
            status: map_status(sub.status),
            current_period_end: timestamp(Some(sub.current_period_end)),
            trial_end: timestamp(sub.trial_end),
            cancel_at_period_end: sub.cancel_at_period_end,
            canceled_at: timestamp(sub.canceled_at),
            plan_id: price.map(|p| p.id.to_string()),
            plan_name,
        }
    }
}

/// Map a processor status onto the stored status set
pub fn map_status(status: stripe::SubscriptionStatus) -> SubscriptionStatus {
    match status {
        stripe::SubscriptionStatus::Trialing => SubscriptionStatus::Trialing,
        stripe::SubscriptionStatus::Active => SubscriptionStatus::Active,
        stripe::SubscriptionStatus::PastDue => SubscriptionStatus::PastDue,
        stripe::SubscriptionStatus::Canceled => SubscriptionStatus::Canceled,
        _ => SubscriptionStatus::Inactive,
    }
}

fn timestamp(unix: Option<i64>) -> Option<OffsetDateTime> {
    unix.and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
}

/// Derive the full store update for a processor subscription.
///
/// Deterministic in its inputs: the same view and `synced_at` always produce
/// the same update, which makes reconciliation writes idempotent.
pub fn derive_update(
    view: &SubscriptionView,
    synced_at: Option<OffsetDateTime>,
) -> SubscriptionUpdate {
    SubscriptionUpdate {
        status: Some(view.status),
        trial_end: view.trial_end,
        current_period_end: view.current_period_end,
        cancel_at_period_end: Some(view.cancel_at_period_end),
        canceled_at: view.canceled_at,
        stripe_customer_id: view.customer_id.clone(),
        stripe_subscription_id: Some(view.subscription_id.clone()),
        plan_id: view.plan_id.clone(),
        plan_name: view.plan_name.clone(),
        last_synced_at: synced_at,
        ..Default::default()
    }
}

/// Counters for one reconciliation run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub total: usize,
    pub synced: usize,
    pub skipped_no_email: usize,
    pub errors: usize,
}

/// Reconciliation over all processor-known subscriptions
#[derive(Clone)]
pub struct SubscriptionService {
    stripe: StripeClient,
    store: RecordStore,
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient, store: RecordStore) -> Self {
        Self { stripe, store }
    }

    /// Page through every subscription the processor knows (all statuses)
    /// and unconditionally overwrite the local record with its view.
    ///
    /// Per-subscription failures are counted and skipped. A listing failure
    /// on the very first page aborts the run with an error (systemic
    /// outage); on a later page it stops pagination but the partial report
    /// is still returned. Records with no processor counterpart are never
    /// touched.
    pub async fn sync_all(&self) -> BillingResult<SyncReport> {
        let mut report = SyncReport::default();
        let mut starting_after: Option<SubscriptionId> = None;
        let mut first_page = true;

        loop {
            let mut params = ListSubscriptions::new();
            params.status = Some(SubscriptionStatusFilter::All);
            params.limit = Some(100);
            params.expand = &["data.customer"];
            params.starting_after = starting_after.clone();

            let page = match Subscription::list(self.stripe.inner(), &params).await {
                Ok(page) => page,
                Err(e) if first_page => {
                    tracing::error!(error = %e, "Subscription listing failed on first page, aborting sync");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Subscription listing failed mid-run, stopping pagination");
                    report.errors += 1;
                    break;
                }
            };
            first_page = false;

            let now = OffsetDateTime::now_utc();
            for sub in &page.data {
                report.total += 1;
                let view = SubscriptionView::from(sub);

                let Some(email) = view.email.as_deref() else {
                    tracing::warn!(
                        subscription_id = %view.subscription_id,
                        "No customer email for subscription, skipping"
                    );
                    report.skipped_no_email += 1;
                    continue;
                };

                let update = derive_update(&view, Some(now));
                match self.store.upsert_subscription(email, &update).await {
                    Ok(()) => {
                        report.synced += 1;
                        tracing::debug!(
                            email = email,
                            status = %view.status,
                            "Synced subscription from processor"
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            subscription_id = %view.subscription_id,
                            error = %e,
                            "Failed to sync subscription"
                        );
                        report.errors += 1;
                    }
                }
            }

            if !page.has_more || page.data.is_empty() {
                break;
            }
            starting_after = page.data.last().map(|s| s.id.clone());
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::macros::datetime;

    fn view() -> SubscriptionView {
        SubscriptionView {
            subscription_id: "sub_123".to_string(),
            customer_id: Some("cus_123".to_string()),
            email: Some("user@example.com".to_string()),
            status: SubscriptionStatus::PastDue,
            current_period_end: Some(datetime!(2026-09-01 00:00 UTC)),
            trial_end: None,
            cancel_at_period_end: false,
            canceled_at: None,
            plan_id: Some("price_123".to_string()),
            plan_name: Some("Standard".to_string()),
        }
    }

    #[test]
    fn derivation_is_idempotent() {
        let synced_at = Some(datetime!(2026-08-07 00:00 UTC));
        let first = derive_update(&view(), synced_at);
        let second = derive_update(&view(), synced_at);
        assert_eq!(first, second);
    }

    #[test]
    fn derivation_differs_only_in_sync_timestamp() {
        let first = derive_update(&view(), Some(datetime!(2026-08-07 00:00 UTC)));
        let mut second = derive_update(&view(), Some(datetime!(2026-08-08 00:00 UTC)));
        assert_ne!(first, second);
        second.last_synced_at = first.last_synced_at;
        assert_eq!(first, second);
    }

    #[test]
    fn derivation_overwrites_cancel_flag_explicitly() {
        // Reconciliation must be able to clear a stale local flag, so the
        // update always carries an explicit value rather than merging.
        let update = derive_update(&view(), None);
        assert_eq!(update.cancel_at_period_end, Some(false));
        assert_eq!(update.status, Some(SubscriptionStatus::PastDue));
    }

    #[test]
    fn derivation_never_sets_warning_or_created_fields() {
        let update = derive_update(&view(), None);
        assert_eq!(update.created_date, None);
        assert_eq!(update.trial_warning_sent, None);
    }
}
