//! Cancellation confirmation flow
//!
//! A subscriber requests a one-time code by email, then confirms the
//! cancellation with it. The code lives on the user record with a ten-minute
//! expiry; the actual cancellation is executed on the processor, whose
//! deletion event then updates the subscription record through the webhook
//! path.

use rand::Rng;
use stripe::{CancelSubscription, ListSubscriptions, Subscription, SubscriptionStatusFilter};
use time::{Duration, OffsetDateTime};

use crate::client::StripeClient;
use crate::email::{BillingEmailService, EmailOutcome};
use crate::error::{BillingError, BillingResult};
use crate::store::{RecordStore, UserRecord, UserUpdate};

const OTP_TTL_MINUTES: i64 = 10;

/// OTP-confirmed cancellation service
#[derive(Clone)]
pub struct CancellationService {
    stripe: StripeClient,
    store: RecordStore,
    email: BillingEmailService,
}

impl CancellationService {
    pub fn new(stripe: StripeClient, store: RecordStore, email: BillingEmailService) -> Self {
        Self {
            stripe,
            store,
            email,
        }
    }

    /// Generate a 6-digit code, store it with its expiry, and email it.
    ///
    /// Unlike billing notifications, delivery failure here is fatal: the
    /// caller cannot proceed without the code.
    pub async fn request_otp(&self, email: &str) -> BillingResult<()> {
        let code: u32 = rand::rng().random_range(100_000..1_000_000);
        let otp = code.to_string();
        let expires_at = OffsetDateTime::now_utc() + Duration::minutes(OTP_TTL_MINUTES);

        self.store
            .upsert_user(
                email,
                &UserUpdate {
                    cancellation_otp: Some(otp.clone()),
                    cancellation_otp_expires: Some(expires_at),
                    ..Default::default()
                },
            )
            .await?;

        match self.email.send_cancellation_otp(email, &otp).await {
            EmailOutcome::Sent => Ok(()),
            EmailOutcome::Skipped(reason) => {
                tracing::warn!(
                    email = email,
                    reason = reason,
                    "Email sending disabled; cancellation code was stored but not delivered"
                );
                Ok(())
            }
            EmailOutcome::Failed(reason) => Err(BillingError::EmailDelivery(reason)),
        }
    }

    /// Validate the code and cancel the subscriber's processor-side
    /// subscription. Returns the canceled subscription id.
    pub async fn verify_otp_and_cancel(&self, email: &str, otp: &str) -> BillingResult<String> {
        let now = OffsetDateTime::now_utc();
        let user = self.store.get_user(email).await?;
        let user = user.ok_or(BillingError::InvalidOtp)?;
        validate_otp(&user, otp, now)?;

        let record = self.store.get_subscription(email).await?;
        let customer_id = record
            .and_then(|r| r.stripe_customer_id)
            .ok_or_else(|| BillingError::SubscriptionNotFound(email.to_string()))?;

        let subscription = self
            .find_cancelable_subscription(&customer_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(email.to_string()))?;

        Subscription::cancel(
            self.stripe.inner(),
            &subscription.id,
            CancelSubscription::default(),
        )
        .await?;

        self.store.clear_cancellation_otp(email).await?;

        tracing::info!(
            email = email,
            subscription_id = %subscription.id,
            "Subscription canceled via OTP confirmation"
        );

        Ok(subscription.id.to_string())
    }

    /// First active subscription for the customer, falling back to trialing
    async fn find_cancelable_subscription(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let customer: stripe::CustomerId = customer_id
            .parse()
            .map_err(|_| BillingError::Internal(format!("Invalid customer id: {customer_id}")))?;

        for status in [
            SubscriptionStatusFilter::Active,
            SubscriptionStatusFilter::Trialing,
        ] {
            let mut params = ListSubscriptions::new();
            params.customer = Some(customer.clone());
            params.status = Some(status);
            params.limit = Some(1);

            let page = Subscription::list(self.stripe.inner(), &params).await?;
            if let Some(sub) = page.data.into_iter().next() {
                return Ok(Some(sub));
            }
        }

        Ok(None)
    }
}

/// Check a submitted code against the stored one
pub(crate) fn validate_otp(user: &UserRecord, otp: &str, now: OffsetDateTime) -> BillingResult<()> {
    let stored = user.cancellation_otp.as_deref().ok_or(BillingError::InvalidOtp)?;
    if stored != otp {
        return Err(BillingError::InvalidOtp);
    }
    let expires = user.cancellation_otp_expires.ok_or(BillingError::InvalidOtp)?;
    if expires < now {
        return Err(BillingError::OtpExpired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use time::macros::datetime;

    fn user(otp: Option<&str>, expires: Option<OffsetDateTime>) -> UserRecord {
        UserRecord {
            email: "user@example.com".to_string(),
            name: None,
            facility: None,
            agreed_to_terms: None,
            agreed_to_privacy: None,
            consent_date: None,
            terms_version: None,
            contract_status: None,
            cancellation_otp: otp.map(|s| s.to_string()),
            cancellation_otp_expires: expires,
            session_token: None,
        }
    }

    #[test]
    fn valid_code_within_ttl_passes() {
        let now = datetime!(2026-08-07 12:00 UTC);
        let u = user(Some("123456"), Some(now + Duration::minutes(5)));
        assert!(validate_otp(&u, "123456", now).is_ok());
    }

    #[test]
    fn wrong_code_is_rejected() {
        let now = datetime!(2026-08-07 12:00 UTC);
        let u = user(Some("123456"), Some(now + Duration::minutes(5)));
        assert!(matches!(
            validate_otp(&u, "654321", now),
            Err(BillingError::InvalidOtp)
        ));
    }

    #[test]
    fn expired_code_is_rejected() {
        let now = datetime!(2026-08-07 12:00 UTC);
        let u = user(Some("123456"), Some(now - Duration::seconds(1)));
        assert!(matches!(
            validate_otp(&u, "123456", now),
            Err(BillingError::OtpExpired)
        ));
    }

    #[test]
    fn missing_code_is_rejected() {
        let now = datetime!(2026-08-07 12:00 UTC);
        let u = user(None, None);
        assert!(matches!(
            validate_otp(&u, "123456", now),
            Err(BillingError::InvalidOtp)
        ));
    }
}
