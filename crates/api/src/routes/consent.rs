//! Terms/privacy consent endpoint

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use time::OffsetDateTime;

use karte_billing::{normalize_email, UserUpdate};

use crate::error::ApiError;
use crate::state::AppState;

const TERMS_VERSION: &str = "1.0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentBody {
    pub email: String,
    pub agreed_to_terms: bool,
    pub agreed_to_privacy: bool,
    pub name: Option<String>,
    pub facility: Option<String>,
}

pub async fn record_consent(
    State(state): State<AppState>,
    Json(body): Json<ConsentBody>,
) -> Result<Json<Value>, ApiError> {
    let email = normalize_email(&body.email);
    if email.is_empty() || !body.agreed_to_terms || !body.agreed_to_privacy {
        return Err(ApiError::BadRequest("Missing required fields".to_string()));
    }

    let update = UserUpdate {
        name: body.name,
        facility: body.facility,
        agreed_to_terms: Some(true),
        agreed_to_privacy: Some(true),
        consent_date: Some(OffsetDateTime::now_utc()),
        terms_version: Some(TERMS_VERSION.to_string()),
        contract_status: Some("agreed".to_string()),
        ..Default::default()
    };
    state.billing.store.upsert_user(&email, &update).await?;

    // The agreement copy is best-effort; consent is already recorded.
    state
        .billing
        .email
        .send_agreement(&email)
        .await
        .log("agreement", &email);

    Ok(Json(json!({ "message": "Consent recorded" })))
}
