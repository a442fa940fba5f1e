//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use karte_billing::BillingService;
use karte_shared::SessionTokens;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub tokens: SessionTokens,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let tokens = SessionTokens::new(&config.jwt_secret, config.session_days);
        let billing = Arc::new(BillingService::new(
            config.stripe_config(),
            config.email_config(),
            tokens.clone(),
            pool.clone(),
        ));

        if billing.email.is_enabled() {
            tracing::info!("Transactional email enabled");
        } else {
            tracing::warn!("Transactional email not configured (missing RESEND_API_KEY)");
        }

        Self {
            pool,
            config,
            tokens,
            billing,
        }
    }
}
