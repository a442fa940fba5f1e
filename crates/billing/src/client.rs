//! Stripe client wrapper
//!
//! Holds the API client together with the configuration it was built from,
//! so webhook verification can reach the shared secret without touching
//! process environment at call time.

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};

/// Stripe configuration, constructed once and injected into services
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_...)
    pub secret_key: String,
    /// Webhook signing secret (whsec_...)
    pub webhook_secret: String,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        Ok(Self {
            secret_key,
            webhook_secret,
        })
    }
}

/// Shared Stripe client
#[derive(Clone)]
pub struct StripeClient {
    inner: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let inner = stripe::Client::new(config.secret_key.clone());
        Self {
            inner,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.inner
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
