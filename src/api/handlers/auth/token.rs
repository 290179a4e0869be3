//! Stateless signed tokens (HS256).
//!
//! The CLI-facing fallback credential: verification needs no database hit.
//! Rotating the signing secret invalidates every outstanding token, which is
//! acceptable because sessions are the primary path.

use anyhow::{Context, Result};
use jsonwebtoken::{
    decode, encode, get_current_timestamp, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claims embedded in a signed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Internal user id.
    pub sub: Uuid,
    pub login: String,
    pub iat: u64,
    pub exp: u64,
}

/// Issue a signed token for a user, valid for `ttl_seconds`.
///
/// # Errors
/// Returns an error if signing fails.
pub(crate) fn issue(
    secret: &SecretString,
    user_id: Uuid,
    login: &str,
    ttl_seconds: i64,
) -> Result<String> {
    let now = get_current_timestamp();
    let claims = Claims {
        sub: user_id,
        login: login.to_string(),
        iat: now,
        exp: now.saturating_add_signed(ttl_seconds),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .context("failed to sign token")
}

/// Verify a signed token.
///
/// Returns `None` on any failure: bad signature, expired, malformed.
pub(crate) fn verify(secret: &SecretString, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::from("signing-secret".to_string())
    }

    #[test]
    fn round_trip_preserves_claims() {
        let user_id = Uuid::new_v4();
        let token = issue(&secret(), user_id, "octocat", 3600).expect("token");
        let claims = verify(&secret(), &token).expect("claims");
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.login, "octocat");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn expired_token_is_rejected() {
        // Far enough in the past to clear the default validation leeway.
        let token = issue(&secret(), Uuid::new_v4(), "octocat", -300).expect("token");
        assert!(verify(&secret(), &token).is_none());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue(&secret(), Uuid::new_v4(), "octocat", 3600).expect("token");
        let other = SecretString::from("other-secret".to_string());
        assert!(verify(&other, &token).is_none());
    }

    #[test]
    fn mutated_token_is_rejected() {
        let token = issue(&secret(), Uuid::new_v4(), "octocat", 3600).expect("token");
        let mut tampered = token.clone();
        tampered.pop();
        assert!(verify(&secret(), &tampered).is_none());

        let truncated = &token[..token.len() / 2];
        assert!(verify(&secret(), truncated).is_none());
    }

    #[test]
    fn garbage_input_is_rejected() {
        assert!(verify(&secret(), "").is_none());
        assert!(verify(&secret(), "not.a.token").is_none());
        assert!(verify(&secret(), "rg_looks_like_an_api_key").is_none());
    }
}
