//! Billing error types

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("unsupported webhook payload: {0}")]
    WebhookEventNotSupported(String),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("invalid cancellation code")]
    InvalidOtp,

    #[error("cancellation code expired")]
    OtpExpired,

    #[error("email delivery failed: {0}")]
    EmailDelivery(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stripe error: {0}")]
    Stripe(#[from] stripe::StripeError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}
