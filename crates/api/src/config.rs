//! Application configuration
//!
//! All environment access happens here, once, at startup. Handlers receive
//! configured services through [`crate::state::AppState`] and never read the
//! environment themselves.

use anyhow::Context;
use karte_billing::{EmailConfig, StripeConfig};

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    pub session_days: i64,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub resend_api_key: Option<String>,
    pub email_sender: String,
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let session_days = std::env::var("SESSION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(14);
        let stripe_secret_key =
            std::env::var("STRIPE_SECRET_KEY").context("STRIPE_SECRET_KEY must be set")?;
        let stripe_webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        if stripe_webhook_secret.is_empty() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set - webhook verification will reject all events");
        }
        let resend_api_key = std::env::var("RESEND_API_KEY").ok().filter(|k| !k.is_empty());
        let email_sender = std::env::var("EMAIL_SENDER")
            .unwrap_or_else(|_| "no-reply@karte-ai-plus.com".to_string());
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            bind_address,
            database_url,
            jwt_secret,
            session_days,
            stripe_secret_key,
            stripe_webhook_secret,
            resend_api_key,
            email_sender,
            allowed_origins,
        })
    }

    pub fn stripe_config(&self) -> StripeConfig {
        StripeConfig {
            secret_key: self.stripe_secret_key.clone(),
            webhook_secret: self.stripe_webhook_secret.clone(),
        }
    }

    pub fn email_config(&self) -> EmailConfig {
        EmailConfig {
            resend_api_key: self.resend_api_key.clone(),
            sender: self.email_sender.clone(),
        }
    }
}
