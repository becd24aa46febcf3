// ---------------------------------------------------------------------------
// Password hashing — argon2 on the blocking pool
// ---------------------------------------------------------------------------

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("worker pool error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Hash with a fresh salt. Runs on the blocking pool so the I/O loop stays
/// responsive under login bursts.
pub async fn hash(password: &str) -> Result<String, PasswordError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| PasswordError::Hash(e.to_string()))
    })
    .await?
}

pub async fn verify(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || {
        let parsed = match PasswordHash::new(&hash) {
            Ok(parsed) => parsed,
            Err(_) => return Ok(false),
        };
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await?
}

/// Strong-password rule applied to new accounts and the seeded admin:
/// length >= 12 with upper case, lower case, digit and punctuation.
pub fn is_strong(password: &str) -> bool {
    password.len() >= 12
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| c.is_ascii_punctuation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_and_verify() {
        let hashed = hash("Password123!Password").await.unwrap();
        assert!(verify("Password123!Password", &hashed).await.unwrap());
        assert!(!verify("wrong", &hashed).await.unwrap());
    }

    #[test]
    fn strong_password_rule() {
        assert!(is_strong("Password123!Password"));
        assert!(!is_strong("short1!A"));
        assert!(!is_strong("alllowercase123!"));
        assert!(!is_strong("ALLUPPERCASE123!"));
        assert!(!is_strong("NoDigitsHere!!aa"));
        assert!(!is_strong("NoPunctuation123aa"));
    }
}
