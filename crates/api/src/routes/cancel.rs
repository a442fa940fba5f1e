//! OTP-confirmed cancellation endpoints

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use karte_billing::normalize_email;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RequestOtpBody {
    pub email: String,
}

pub async fn request_otp(
    State(state): State<AppState>,
    Json(body): Json<RequestOtpBody>,
) -> Result<Json<Value>, ApiError> {
    let email = normalize_email(&body.email);
    if email.is_empty() {
        return Err(ApiError::BadRequest("Email required".to_string()));
    }

    state.billing.cancellation.request_otp(&email).await?;

    Ok(Json(json!({ "message": "OTP sent" })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyOtpBody {
    pub email: String,
    pub otp: String,
}

pub async fn verify_otp(
    State(state): State<AppState>,
    Json(body): Json<VerifyOtpBody>,
) -> Result<Json<Value>, ApiError> {
    let email = normalize_email(&body.email);
    if email.is_empty() || body.otp.is_empty() {
        return Err(ApiError::BadRequest("Email and OTP required".to_string()));
    }

    let subscription_id = state
        .billing
        .cancellation
        .verify_otp_and_cancel(&email, &body.otp)
        .await?;

    Ok(Json(json!({
        "message": "Subscription canceled",
        "subscriptionId": subscription_id,
    })))
}
