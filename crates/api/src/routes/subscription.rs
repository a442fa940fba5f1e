//! Subscription access check
//!
//! Every protected surface asks this endpoint (or calls the same
//! [`karte_billing::access`] routine directly). A missing record is a valid
//! negative answer, not an error.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use time::OffsetDateTime;

use karte_billing::access;

use crate::auth::AuthedUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub active: bool,
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expiry: Option<OffsetDateTime>,
}

pub async fn check(
    State(state): State<AppState>,
    user: AuthedUser,
) -> Result<Json<AccessResponse>, ApiError> {
    let record = state.billing.store.get_subscription(&user.email).await?;
    let decision = access::decide(record.as_ref(), OffsetDateTime::now_utc());

    Ok(Json(AccessResponse {
        active: decision.active,
        status: decision.status.as_str(),
        expiry: decision.expiry,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn response_serializes_expiry_as_timestamp_or_null() {
        let resp = AccessResponse {
            active: true,
            status: "past_due",
            expiry: Some(datetime!(2026-09-01 00:00 UTC)),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["active"], true);
        assert_eq!(json["status"], "past_due");
        assert!(json["expiry"]
            .as_str()
            .unwrap()
            .starts_with("2026-09-01T00:00:00"));

        let denied = AccessResponse {
            active: false,
            status: "inactive",
            expiry: None,
        };
        let json = serde_json::to_value(&denied).unwrap();
        assert_eq!(json["expiry"], serde_json::Value::Null);
    }
}
