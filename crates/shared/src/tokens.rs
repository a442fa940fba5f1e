//! Session token signing and verification
//!
//! Long-lived session credentials keyed by email. The webhook handler mints
//! one when a checkout completes; the API verifies it on every protected
//! request.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Claims carried by a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Normalized email of the subscriber
    pub email: String,
    /// Token kind discriminator; always "session" for tokens we issue
    #[serde(rename = "type")]
    pub token_type: String,
    /// Expiry (unix seconds)
    pub exp: i64,
    /// Issued-at (unix seconds)
    pub iat: i64,
}

/// HS256 signer/verifier for session tokens
#[derive(Clone)]
pub struct SessionTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    session_days: i64,
}

impl SessionTokens {
    pub fn new(secret: &str, session_days: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            session_days,
        }
    }

    /// Issue a long-lived session token for an email
    pub fn issue_session(&self, email: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let now = OffsetDateTime::now_utc();
        let claims = SessionClaims {
            email: email.to_string(),
            token_type: "session".to_string(),
            exp: (now + time::Duration::days(self.session_days)).unix_timestamp(),
            iat: now.unix_timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding)
    }

    /// Verify a session token and return its claims
    ///
    /// Rejects tokens whose `type` claim is not "session" even when the
    /// signature is valid.
    pub fn verify_session(
        &self,
        token: &str,
    ) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
        let data = decode::<SessionClaims>(token, &self.decoding, &Validation::default())?;
        if data.claims.token_type != "session" {
            return Err(jsonwebtoken::errors::ErrorKind::InvalidToken.into());
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn issue_and_verify_round_trip() {
        let tokens = SessionTokens::new("test-secret", 14);
        let token = tokens.issue_session("user@example.com").unwrap();
        let claims = tokens.verify_session(&token).unwrap();
        assert_eq!(claims.email, "user@example.com");
        assert_eq!(claims.token_type, "session");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let issuer = SessionTokens::new("secret-a", 14);
        let verifier = SessionTokens::new("secret-b", 14);
        let token = issuer.issue_session("user@example.com").unwrap();
        assert!(verifier.verify_session(&token).is_err());
    }

    #[test]
    fn verify_rejects_garbage() {
        let tokens = SessionTokens::new("test-secret", 14);
        assert!(tokens.verify_session("not-a-token").is_err());
    }
}
