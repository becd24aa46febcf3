// ---------------------------------------------------------------------------
// Value encryption for secrets at rest (upstream API keys)
// ---------------------------------------------------------------------------
// AES-256-GCM under a key derived from TOKEN_ENCRYPTION_KEY (falling back to
// MEM_ENCRYPTION_KEY). Ciphertexts carry an `enc:` prefix so plaintext values
// written before a key was configured keep working.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

const ENC_PREFIX: &str = "enc:";
const NONCE_LEN: usize = 12;

fn derive_key(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}

/// Encrypt a value if a key is configured; plaintext passthrough otherwise.
pub fn encrypt_value(secret: Option<&str>, value: &str) -> String {
    let Some(secret) = secret else {
        return value.to_string();
    };
    let cipher = Aes256Gcm::new((&derive_key(secret)).into());
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    match cipher.encrypt(nonce, value.as_bytes()) {
        Ok(ciphertext) => {
            let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
            blob.extend_from_slice(&nonce_bytes);
            blob.extend_from_slice(&ciphertext);
            format!("{ENC_PREFIX}{}", URL_SAFE_NO_PAD.encode(blob))
        }
        Err(_) => value.to_string(),
    }
}

/// Decrypt an `enc:`-prefixed value. Unprefixed values pass through; a
/// prefixed value without a usable key returns None.
pub fn decrypt_value(secret: Option<&str>, value: &str) -> Option<String> {
    let Some(encoded) = value.strip_prefix(ENC_PREFIX) else {
        return Some(value.to_string());
    };
    let secret = secret?;
    let blob = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    if blob.len() < NONCE_LEN {
        return None;
    }
    let cipher = Aes256Gcm::new((&derive_key(secret)).into());
    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
    let plaintext = cipher.decrypt(nonce, &blob[NONCE_LEN..]).ok()?;
    String::from_utf8(plaintext).ok()
}
