// ---------------------------------------------------------------------------
// Bearer token + CSRF material
// ---------------------------------------------------------------------------

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Username the token was issued to.
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    /// Token id; the revocation ledger tracks these.
    pub jti: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token encode error: {0}")]
    Encode(String),

    #[error("invalid or expired token")]
    Invalid,
}

/// Issue a signed bearer token for `username` with the configured lifetime.
pub fn issue(secret: &str, username: &str, ttl_seconds: u64) -> Result<(String, Claims), TokenError> {
    let now = chrono::Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: username.to_string(),
        iat: now,
        exp: now + ttl_seconds,
        jti: uuid::Uuid::new_v4().to_string(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| TokenError::Encode(e.to_string()))?;
    Ok((token, claims))
}

/// Verify signature and expiry; revocation is checked separately against the
/// ledger.
pub fn verify(secret: &str, token: &str) -> Result<Claims, TokenError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| TokenError::Invalid)
}

/// Opaque CSRF token: 32 random bytes, hex-encoded.
pub fn new_csrf_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time comparison for CSRF and scrape tokens.
pub fn tokens_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_verify_round_trips_claims() {
        let (token, claims) = issue("secret", "alice", 60).unwrap();
        let verified = verify("secret", &token).unwrap();
        assert_eq!(verified.sub, "alice");
        assert_eq!(verified.jti, claims.jti);
        assert!(verified.exp > verified.iat);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (token, _) = issue("secret", "alice", 60).unwrap();
        assert!(verify("other", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = chrono::Utc::now().timestamp() as u64;
        let claims = Claims {
            sub: "alice".into(),
            iat: now - 600,
            exp: now - 300,
            jti: "old".into(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert!(verify("secret", &token).is_err());
    }

    #[test]
    fn csrf_tokens_are_unique_and_compare_in_constant_time() {
        let a = new_csrf_token();
        let b = new_csrf_token();
        assert_ne!(a, b);
        assert!(tokens_match(&a, &a));
        assert!(!tokens_match(&a, &b));
    }
}
