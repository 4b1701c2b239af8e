//! File-backed credential store.
//!
//! The record is sealed with ChaCha20-Poly1305 under a random key kept
//! in a sidecar file (0600 on unix). The blob layout is nonce followed
//! by ciphertext; a fresh nonce is drawn per write. Writes go through
//! a temp file and rename so a concurrent reader never observes a torn
//! record. Disk IO runs on the blocking pool.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, OsRng},
    ChaCha20Poly1305, KeyInit, Nonce,
};
use tracing::debug;

use super::store::{task_failed, CredentialStore, StorageError};
use super::tokens::SessionRecord;

/// Sealed record file name
const RECORD_FILE: &str = "session.bin";

/// Sidecar key file name
const KEY_FILE: &str = ".session_key";

/// Application directory under the platform data dir
const APP_DIR: &str = "gymlog";

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the platform data directory, e.g.
    /// `~/.local/share/gymlog` on Linux.
    pub fn default_location() -> Result<Self, StorageError> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| StorageError::Unavailable("could not find data directory".into()))?;
        Ok(Self::new(data_dir.join(APP_DIR)))
    }

    fn load_or_create_key(dir: &Path) -> Result<[u8; KEY_LEN], StorageError> {
        let path = dir.join(KEY_FILE);
        if path.exists() {
            let bytes = fs::read(&path)?;
            return bytes.as_slice().try_into().map_err(|_| {
                StorageError::Corrupt(format!(
                    "key file has invalid length (expected {KEY_LEN} bytes)"
                ))
            });
        }

        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self::write_new_key_file(&path, &key)?;
        debug!(path = %path.display(), "created session key file");
        Ok(key)
    }

    fn write_new_key_file(path: &Path, key: &[u8]) -> Result<(), StorageError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(path)?;
            file.write_all(key)?;
            file.sync_all()?;
        }

        #[cfg(not(unix))]
        {
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path)?;
            file.write_all(key)?;
            file.sync_all()?;
        }

        Ok(())
    }

    fn cipher(dir: &Path) -> Result<ChaCha20Poly1305, StorageError> {
        let key = Self::load_or_create_key(dir)?;
        ChaCha20Poly1305::new_from_slice(&key)
            .map_err(|_| StorageError::Unavailable("invalid key length".into()))
    }

    fn seal(dir: &Path, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let cipher = Self::cipher(dir)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| StorageError::Unavailable("encryption failed".into()))?;

        let mut blob = nonce_bytes.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn open_blob(dir: &Path, blob: &[u8]) -> Result<Vec<u8>, StorageError> {
        if blob.len() < NONCE_LEN {
            return Err(StorageError::Corrupt("sealed record too short".into()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        Self::cipher(dir)?
            .decrypt(nonce, ciphertext)
            .map_err(|_| StorageError::Corrupt("decryption failed".into()))
    }

    fn save_blocking(dir: &Path, plaintext: &[u8]) -> Result<(), StorageError> {
        fs::create_dir_all(dir)?;

        let blob = Self::seal(dir, plaintext)?;

        // Temp-file + rename keeps the record atomic on disk.
        let path = dir.join(RECORD_FILE);
        let tmp = dir.join(format!("{RECORD_FILE}.tmp"));
        fs::write(&tmp, &blob)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "session record saved");
        Ok(())
    }

    fn load_blocking(dir: &Path) -> Result<Option<SessionRecord>, StorageError> {
        let path = dir.join(RECORD_FILE);
        if !path.exists() {
            return Ok(None);
        }

        let blob = fs::read(&path)?;
        let plaintext = Self::open_blob(dir, &blob)?;
        let record =
            serde_json::from_slice(&plaintext).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        Ok(Some(record))
    }

    fn clear_blocking(dir: &Path) -> Result<(), StorageError> {
        let path = dir.join(RECORD_FILE);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!(path = %path.display(), "session record cleared");
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn save(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let dir = self.dir.clone();
        let plaintext = serde_json::to_vec(record)?;
        tokio::task::spawn_blocking(move || Self::save_blocking(&dir, &plaintext))
            .await
            .map_err(task_failed)?
    }

    async fn load(&self) -> Result<Option<SessionRecord>, StorageError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || Self::load_blocking(&dir))
            .await
            .map_err(task_failed)?
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || Self::clear_blocking(&dir))
            .await
            .map_err(task_failed)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tokens::TokenPair;
    use crate::models::User;
    use tempfile::TempDir;

    fn record() -> SessionRecord {
        SessionRecord::new(
            User {
                id: "u1".to_string(),
                name: "Ana".to_string(),
                email: "a@b.com".to_string(),
                avatar: Some("u1.jpeg".to_string()),
            },
            TokenPair::new("access-1", "refresh-1"),
        )
    }

    #[tokio::test]
    async fn roundtrip_preserves_record() {
        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path());

        store.save(&record()).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.user.id, "u1");
        assert_eq!(loaded.tokens.refresh_token, "refresh-1");
    }

    #[tokio::test]
    async fn missing_record_loads_as_none() {
        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn record_is_not_plaintext_on_disk() {
        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path());
        store.save(&record()).await.unwrap();

        let blob = fs::read(tmp.path().join(RECORD_FILE)).unwrap();
        let raw = String::from_utf8_lossy(&blob);
        assert!(!raw.contains("access-1"));
        assert!(!raw.contains("a@b.com"));
    }

    #[tokio::test]
    async fn garbage_on_disk_reports_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path());
        // Seed the key so decryption is actually attempted.
        store.save(&record()).await.unwrap();

        fs::write(tmp.path().join(RECORD_FILE), b"not a sealed record").unwrap();
        assert!(matches!(
            store.load().await,
            Err(StorageError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path());

        store.save(&record()).await.unwrap();
        store.clear().await.unwrap();
        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let store = FileCredentialStore::new(tmp.path());
        store.save(&record()).await.unwrap();

        let mode = fs::metadata(tmp.path().join(KEY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
