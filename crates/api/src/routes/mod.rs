//! HTTP routes

pub mod cancel;
pub mod consent;
pub mod subscription;
pub mod webhooks;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/webhooks/stripe", post(webhooks::stripe_webhook))
        .route(
            "/api/subscription/check",
            get(subscription::check).post(subscription::check),
        )
        .route("/api/cancel/request-otp", post(cancel::request_otp))
        .route("/api/cancel/verify-otp", post(cancel::verify_otp))
        .route("/api/consent", post(consent::record_consent))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
