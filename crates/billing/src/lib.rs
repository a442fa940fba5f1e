// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries Stripe error payloads
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Karte AI+ Billing Module
//!
//! Handles Stripe integration for the subscription lifecycle.
//!
//! ## Features
//!
//! - **Record Store**: email-keyed subscription/user/receipt records with
//!   merge-upsert semantics and the legacy partition/row-key addressing
//! - **Webhooks**: Handle Stripe events (checkout, subscription lifecycle,
//!   invoices) with fail-closed signature verification
//! - **Reconciliation**: daily full overwrite of the local cache from the
//!   processor's subscription listing
//! - **Access Decision**: the single `is_active` routine shared by every
//!   protected endpoint
//! - **Cancellation**: OTP-confirmed subscription cancellation
//! - **Email Notifications**: welcome, trial warnings, cancellation notices,
//!   payment failures, receipts

pub mod access;
pub mod cancellation;
pub mod client;
pub mod email;
pub mod error;
pub mod receipt;
pub mod store;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Access
pub use access::{decide, is_active, AccessDecision};

// Cancellation
pub use cancellation::CancellationService;

// Client
pub use client::{StripeClient, StripeConfig};

// Email
pub use email::{BillingEmailService, EmailConfig, EmailOutcome};

// Error
pub use error::{BillingError, BillingResult};

// Receipt
pub use receipt::{build_receipt_email, receipt_record_from_invoice, ReceiptEmail};

// Store
pub use store::{
    email_row_key, normalize_email, ReceiptRecord, RecordStore, SubscriptionRecord,
    SubscriptionUpdate, UserRecord, UserUpdate,
};

// Subscriptions
pub use subscriptions::{derive_update, SubscriptionService, SubscriptionView, SyncReport};

// Webhooks
pub use webhooks::WebhookHandler;

use karte_shared::SessionTokens;
use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub store: RecordStore,
    pub email: BillingEmailService,
    pub subscriptions: SubscriptionService,
    pub cancellation: CancellationService,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a billing service with explicit configuration
    pub fn new(
        stripe_config: StripeConfig,
        email_config: EmailConfig,
        tokens: SessionTokens,
        pool: PgPool,
    ) -> Self {
        let stripe = StripeClient::new(stripe_config);
        let store = RecordStore::new(pool);
        let email = BillingEmailService::new(email_config);

        Self {
            store: store.clone(),
            email: email.clone(),
            subscriptions: SubscriptionService::new(stripe.clone(), store.clone()),
            cancellation: CancellationService::new(stripe.clone(), store.clone(), email.clone()),
            webhooks: WebhookHandler::new(stripe, store, email, tokens),
        }
    }

    /// Create a billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe_config = StripeConfig::from_env()?;
        let email_config = EmailConfig::from_env();
        let jwt_secret = std::env::var("JWT_SECRET")
            .map_err(|_| BillingError::Config("JWT_SECRET not set".to_string()))?;
        let session_days = std::env::var("SESSION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(14);
        let tokens = SessionTokens::new(&jwt_secret, session_days);

        Ok(Self::new(stripe_config, email_config, tokens, pool))
    }
}
