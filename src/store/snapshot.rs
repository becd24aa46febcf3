// ---------------------------------------------------------------------------
// Encrypted memory snapshots (memory mode only)
// ---------------------------------------------------------------------------
// The whole entity graph serializes to JSON keyed by collection name, then
// AES-256-GCM with a key derived from MEM_ENCRYPTION_KEY. AEAD work runs on
// the blocking pool; the async loop only does file I/O.

use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::store::memory::MemoryStore;

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("MEM_ENCRYPTION_KEY is not set; refusing to write an unencrypted dump")]
    MissingKey,

    #[error("snapshot crypto error: {0}")]
    Crypto(String),

    #[error("snapshot serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker pool error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn derive_key(secret: &str) -> [u8; 32] {
    let digest = Sha256::digest(secret.as_bytes());
    digest.into()
}

fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, SnapshotError> {
    let cipher = Aes256Gcm::new(key.into());
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| SnapshotError::Crypto(e.to_string()))?;
    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

fn decrypt(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>, SnapshotError> {
    if blob.len() < NONCE_LEN {
        return Err(SnapshotError::Crypto("blob too short".into()));
    }
    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &blob[NONCE_LEN..])
        .map_err(|e| SnapshotError::Crypto(e.to_string()))
}

/// Timestamp-suffixed sibling of the configured dump path, so repeated
/// auto-saves never clobber each other.
fn stamped_path(base: &str) -> PathBuf {
    let base = Path::new(base);
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "doorman_dump".into());
    let ext = base
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bin".into());
    let ts = chrono::Utc::now().timestamp();
    let name = format!("{stem}-{ts}.{ext}");
    match base.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Serialize + encrypt every collection and write the blob. Returns the
/// written path.
pub async fn dump_to_file(
    store: &MemoryStore,
    dump_path: &str,
    encryption_key: Option<&str>,
) -> Result<PathBuf, SnapshotError> {
    let secret = encryption_key.ok_or(SnapshotError::MissingKey)?;
    let key = derive_key(secret);

    let data = store.dump_data().await;
    let plaintext = serde_json::to_vec(&Value::Object(data))?;

    let blob =
        tokio::task::spawn_blocking(move || encrypt(&key, &plaintext)).await??;

    let path = stamped_path(dump_path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(&path, &blob).await?;
    tracing::info!("memory dump written to {} ({} bytes)", path.display(), blob.len());
    Ok(path)
}

/// Decrypt a dump file, clear current state, and load the snapshot.
pub async fn restore_from_file(
    store: &MemoryStore,
    path: &Path,
    encryption_key: Option<&str>,
) -> Result<usize, SnapshotError> {
    let secret = encryption_key.ok_or(SnapshotError::MissingKey)?;
    let key = derive_key(secret);

    let blob = tokio::fs::read(path).await?;
    let plaintext =
        tokio::task::spawn_blocking(move || decrypt(&key, &blob)).await??;

    let value: Value = serde_json::from_slice(&plaintext)?;
    let data: Map<String, Value> = value.as_object().cloned().unwrap_or_default();
    let collections = data.len();
    store.load_data(data).await;
    tracing::info!(
        "memory snapshot restored from {} ({} collections)",
        path.display(),
        collections
    );
    Ok(collections)
}

/// Most recently modified dump file in a directory, if any.
pub fn find_latest_dump_path(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .flatten()
        .filter(|entry| entry.path().is_file())
        .max_by_key(|entry| {
            entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH)
        })
        .map(|entry| entry.path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn dump_then_restore_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("dump.bin");
        let store = MemoryStore::new();
        store
            .insert_one("apis", json!({"api_name": "a", "api_version": "v1"}))
            .await;
        store
            .insert_one("crud_data_orders", json!({"_id": "o-1", "total": 10}))
            .await;

        let path = dump_to_file(&store, base.to_str().unwrap(), Some("test-secret-123"))
            .await
            .unwrap();
        assert!(path.exists());

        let restored = MemoryStore::new();
        restore_from_file(&restored, &path, Some("test-secret-123"))
            .await
            .unwrap();
        assert_eq!(restored.count("apis", &Default::default()).await, 1);
        assert_eq!(
            restored.count("crud_data_orders", &Default::default()).await,
            1
        );

        let latest = find_latest_dump_path(dir.path()).unwrap();
        assert_eq!(latest, path);
    }

    #[tokio::test]
    async fn dump_without_key_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("dump.bin");
        let store = MemoryStore::new();
        let err = dump_to_file(&store, base.to_str().unwrap(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::MissingKey));
    }

    #[tokio::test]
    async fn restore_with_wrong_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("dump.bin");
        let store = MemoryStore::new();
        store.insert_one("apis", json!({"api_name": "a"})).await;
        let path = dump_to_file(&store, base.to_str().unwrap(), Some("right-key"))
            .await
            .unwrap();

        let err = restore_from_file(&store, &path, Some("wrong-key"))
            .await
            .unwrap_err();
        assert!(matches!(err, SnapshotError::Crypto(_)));
    }
}
