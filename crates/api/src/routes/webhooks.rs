//! Stripe webhook endpoint
//!
//! The body must reach signature verification as raw bytes; business fields
//! are only parsed after the signature checks out.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let payload = match std::str::from_utf8(&body) {
        Ok(p) => p,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "Webhook Error: invalid body").into_response();
        }
    };

    let event = match state.billing.webhooks.verify_event(payload, signature) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "Webhook signature verification failed");
            return (StatusCode::BAD_REQUEST, format!("Webhook Error: {}", e)).into_response();
        }
    };

    match state.billing.webhooks.handle_event(event).await {
        Ok(()) => Json(json!({ "received": true })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Error processing webhook");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
