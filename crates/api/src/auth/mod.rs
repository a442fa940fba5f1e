//! Bearer session authentication

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use karte_billing::normalize_email;

use crate::error::ApiError;
use crate::state::AppState;

/// Authenticated subscriber, extracted from the bearer session token
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub email: String,
}

impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let token = bearer_token(header)
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;
        let claims = state
            .tokens
            .verify_session(token)
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

        Ok(AuthedUser {
            email: normalize_email(&claims.email),
        })
    }
}

/// Extract the token from a `Bearer <token>` header value
fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?;
    let mut parts = header.splitn(2, ' ');
    match (parts.next(), parts.next()) {
        (Some("Bearer"), Some(token)) if !token.is_empty() => Some(token),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_parses_well_formed_header() {
        assert_eq!(bearer_token(Some("Bearer abc.def.ghi")), Some("abc.def.ghi"));
    }

    #[test]
    fn bearer_token_rejects_malformed_headers() {
        assert_eq!(bearer_token(None), None);
        assert_eq!(bearer_token(Some("")), None);
        assert_eq!(bearer_token(Some("Bearer")), None);
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("bearer abc")), None);
    }
}
