//! Stripe webhook handling
//!
//! Verifies event signatures and applies per-event updates to the record
//! store. Signature verification fails closed before any business field is
//! parsed. Store writes commit before notification attempts; email failures
//! surface as logged outcomes and never roll anything back — the periodic
//! reconciliation pass corrects whatever a dropped or failed event missed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use stripe::{
    CheckoutSession, Customer, Event, EventObject, EventType, Invoice, Subscription, Webhook,
};
use time::macros::format_description;
use time::OffsetDateTime;

use karte_shared::{SessionTokens, SubscriptionStatus};

use crate::client::StripeClient;
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::receipt::{build_receipt_email, receipt_record_from_invoice};
use crate::store::{RecordStore, SubscriptionRecord, SubscriptionUpdate, UserUpdate};
use crate::subscriptions::{derive_update, SubscriptionView};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed payload before it is rejected as a replay
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    store: RecordStore,
    email: BillingEmailService,
    tokens: SessionTokens,
}

impl WebhookHandler {
    pub fn new(
        stripe: StripeClient,
        store: RecordStore,
        email: BillingEmailService,
        tokens: SessionTokens,
    ) -> Self {
        Self {
            stripe,
            store,
            email,
            tokens,
        }
    }

    /// Verify and parse a Stripe webhook event
    ///
    /// Uses manual signature verification as a fallback to work around
    /// async-stripe version incompatibility with newer Stripe API versions.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        let now = OffsetDateTime::now_utc().unix_timestamp();
        verify_signature_manual(payload, signature, webhook_secret, now)?;

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook verification succeeded"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event
    ///
    /// Unknown event types are accepted and ignored so processor API
    /// evolution never turns into delivery failures. Processor retries are
    /// harmless: every update is an idempotent merge-upsert and the daily
    /// reconciliation corrects any miss.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(extract_checkout_session(event)?)
                    .await
            }
            EventType::CustomerSubscriptionUpdated => {
                self.handle_subscription_updated(extract_subscription(event)?)
                    .await
            }
            EventType::CustomerSubscriptionDeleted => {
                self.handle_subscription_deleted(extract_subscription(event)?)
                    .await
            }
            EventType::InvoicePaid => self.handle_invoice_paid(extract_invoice(event)?).await,
            EventType::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(extract_invoice(event)?)
                    .await
            }
            other => {
                tracing::info!(
                    event_type = %other,
                    "Received unhandled Stripe event type - no handler configured"
                );
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, session: CheckoutSession) -> BillingResult<()> {
        let Some(email) = session
            .customer_details
            .as_ref()
            .and_then(|d| d.email.clone())
        else {
            tracing::warn!(session_id = %session.id, "No email in checkout session, skipping");
            return Ok(());
        };

        let now = OffsetDateTime::now_utc();
        let customer_id = session.customer.as_ref().map(|c| c.id().to_string());

        let mut update = match &session.subscription {
            Some(sub_ref) => {
                let sub_id: stripe::SubscriptionId = sub_ref.id().parse().map_err(|_| {
                    BillingError::SubscriptionNotFound(sub_ref.id().to_string())
                })?;
                match Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await {
                    Ok(sub) => derive_update(&SubscriptionView::from(&sub), None),
                    Err(e) => {
                        // The record still gets created; the daily sync will
                        // fill in whatever this retrieval missed.
                        tracing::error!(
                            subscription_id = %sub_id,
                            error = %e,
                            "Failed to retrieve subscription for checkout session"
                        );
                        SubscriptionUpdate {
                            status: Some(SubscriptionStatus::Active),
                            stripe_subscription_id: Some(sub_id.to_string()),
                            ..Default::default()
                        }
                    }
                }
            }
            None => SubscriptionUpdate {
                status: Some(SubscriptionStatus::Active),
                ..Default::default()
            },
        };

        if update.current_period_end.is_none() {
            update.current_period_end = Some(now + time::Duration::days(30));
        }
        if update.stripe_customer_id.is_none() {
            update.stripe_customer_id = customer_id;
        }
        update.created_date = Some(calendar_date(now));

        self.store.upsert_subscription(&email, &update).await?;

        // Long-lived session credential for the success page / extension
        match self.tokens.issue_session(&email) {
            Ok(token) => {
                let user_update = UserUpdate {
                    session_token: Some(token),
                    ..Default::default()
                };
                if let Err(e) = self.store.upsert_user(&email, &user_update).await {
                    tracing::error!(error = %e, "Failed to save session token on user record");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to issue session token");
            }
        }

        self.email.send_welcome(&email).await.log("welcome", &email);

        tracing::info!(
            email = %email,
            status = ?update.status,
            "Checkout completed, subscription record created"
        );

        Ok(())
    }

    async fn handle_subscription_updated(&self, subscription: Subscription) -> BillingResult<()> {
        let view = SubscriptionView::from(&subscription);
        let Some(email) = self.resolve_subscription_email(&view).await else {
            tracing::warn!(
                subscription_id = %view.subscription_id,
                "No customer email for subscription event, skipping"
            );
            return Ok(());
        };

        let prior = self.store.get_subscription(&email).await?;
        let update = derive_update(&view, None);
        self.store.upsert_subscription(&email, &update).await?;

        if trial_just_converted(prior.as_ref(), view.status) {
            self.email
                .send_trial_ended(&email)
                .await
                .log("trial_ended", &email);
        }

        if cancellation_newly_scheduled(prior.as_ref(), view.cancel_at_period_end) {
            self.email
                .send_cancellation_scheduled(&email, view.current_period_end)
                .await
                .log("cancellation_scheduled", &email);
        }

        if view.status == SubscriptionStatus::PastDue {
            tracing::warn!(
                email = %email,
                subscription_id = %view.subscription_id,
                "Subscription is past due"
            );
        }

        tracing::info!(
            email = %email,
            subscription_id = %view.subscription_id,
            status = %view.status,
            "Subscription updated"
        );

        Ok(())
    }

    async fn handle_subscription_deleted(&self, subscription: Subscription) -> BillingResult<()> {
        let view = SubscriptionView::from(&subscription);
        let Some(email) = self.resolve_subscription_email(&view).await else {
            tracing::warn!(
                subscription_id = %view.subscription_id,
                "No customer email for subscription event, skipping"
            );
            return Ok(());
        };

        let now = OffsetDateTime::now_utc();
        let mut update = derive_update(&view, None);
        update.status = Some(SubscriptionStatus::Canceled);
        update.cancel_at_period_end = Some(false);
        if update.canceled_at.is_none() {
            update.canceled_at = Some(now);
        }

        self.store.upsert_subscription(&email, &update).await?;

        self.email
            .send_cancellation(&email, view.current_period_end)
            .await
            .log("cancellation", &email);

        tracing::info!(
            email = %email,
            subscription_id = %view.subscription_id,
            "Subscription deleted, record marked canceled"
        );

        Ok(())
    }

    async fn handle_invoice_paid(&self, invoice: Invoice) -> BillingResult<()> {
        let Some(email) = self.resolve_invoice_email(&invoice).await else {
            tracing::warn!(invoice_id = %invoice.id, "No customer email on invoice, skipping");
            return Ok(());
        };

        let receipt = receipt_record_from_invoice(&invoice, Some(email.clone()));
        self.store.upsert_receipt(&receipt).await?;

        let content = build_receipt_email(&receipt);
        self.email
            .send_receipt(&email, &content)
            .await
            .log("receipt", &email);

        tracing::info!(
            email = %email,
            invoice_id = %invoice.id,
            amount = receipt.amount_minor,
            "Invoice paid, receipt recorded"
        );

        Ok(())
    }

    async fn handle_invoice_payment_failed(&self, invoice: Invoice) -> BillingResult<()> {
        let Some(email) = self.resolve_invoice_email(&invoice).await else {
            tracing::warn!(invoice_id = %invoice.id, "No customer email on invoice, skipping");
            return Ok(());
        };

        // No status change here: the processor reports the resulting status
        // through customer.subscription.updated.
        let amount = invoice.amount_due.unwrap_or(0);
        let currency = invoice
            .currency
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "jpy".to_string());

        self.email
            .send_payment_failed(&email, amount, &currency, invoice.hosted_invoice_url.as_deref())
            .await
            .log("payment_failed", &email);

        tracing::warn!(
            email = %email,
            invoice_id = %invoice.id,
            amount = amount,
            "Invoice payment failed"
        );

        Ok(())
    }

    /// Email for a subscription event: embedded customer object first, then
    /// a customer retrieval. Retrieval failures resolve to `None` so the
    /// event is skipped rather than failed.
    async fn resolve_subscription_email(&self, view: &SubscriptionView) -> Option<String> {
        if let Some(email) = &view.email {
            return Some(email.clone());
        }
        let customer_id = view.customer_id.as_deref()?;
        self.retrieve_customer_email(customer_id).await
    }

    async fn resolve_invoice_email(&self, invoice: &Invoice) -> Option<String> {
        if let Some(email) = &invoice.customer_email {
            return Some(email.clone());
        }
        match &invoice.customer {
            Some(stripe::Expandable::Object(c)) => c.email.clone(),
            Some(stripe::Expandable::Id(id)) => self.retrieve_customer_email(id.as_str()).await,
            None => None,
        }
    }

    async fn retrieve_customer_email(&self, customer_id: &str) -> Option<String> {
        let parsed: stripe::CustomerId = customer_id.parse().ok()?;
        match Customer::retrieve(self.stripe.inner(), &parsed, &[]).await {
            Ok(customer) => customer.email.clone(),
            Err(e) => {
                tracing::error!(
                    customer_id = %customer_id,
                    error = %e,
                    "Failed to retrieve customer"
                );
                None
            }
        }
    }
}

/// Manual verification of the `t=...,v1=...` signature header.
///
/// `now_unix` is injected so the tolerance window is testable.
pub(crate) fn verify_signature_manual(
    payload: &str,
    signature: &str,
    webhook_secret: &str,
    now_unix: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::error!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;
    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::error!("Missing v1 signature in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if (now_unix - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::error!(
            timestamp = timestamp,
            now = now_unix,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let secret_key = webhook_secret
        .strip_prefix("whsec_")
        .unwrap_or(webhook_secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::error!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

/// Trial just converted to a paid subscription: the stored record said
/// trialing and the processor now says active.
pub(crate) fn trial_just_converted(
    prior: Option<&SubscriptionRecord>,
    new_status: SubscriptionStatus,
) -> bool {
    new_status == SubscriptionStatus::Active
        && matches!(prior, Some(p) if p.status == SubscriptionStatus::Trialing)
}

/// Cancellation scheduled for the first time: the flag is set now and the
/// stored record confirms it was previously clear. Without a stored
/// previous=false the notice is not sent, so unrelated later updates can
/// never re-send it.
pub(crate) fn cancellation_newly_scheduled(
    prior: Option<&SubscriptionRecord>,
    cancel_at_period_end: bool,
) -> bool {
    cancel_at_period_end && matches!(prior, Some(p) if !p.cancel_at_period_end)
}

fn calendar_date(now: OffsetDateTime) -> String {
    let fmt = format_description!("[year]-[month]-[day]");
    now.date().format(&fmt).unwrap_or_else(|_| now.date().to_string())
}

fn extract_subscription(event: Event) -> BillingResult<Subscription> {
    match event.data.object {
        EventObject::Subscription(subscription) => Ok(subscription),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected Subscription".to_string(),
        )),
    }
}

fn extract_invoice(event: Event) -> BillingResult<Invoice> {
    match event.data.object {
        EventObject::Invoice(invoice) => Ok(invoice),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected Invoice".to_string(),
        )),
    }
}

fn extract_checkout_session(event: Event) -> BillingResult<CheckoutSession> {
    match event.data.object {
        EventObject::CheckoutSession(session) => Ok(session),
        _ => Err(BillingError::WebhookEventNotSupported(
            "Expected CheckoutSession".to_string(),
        )),
    }
}
