//! Durable persistence for the session record.
//!
//! A store holds at most one record per device: the serialized
//! identity/token pair written as a single blob so a reader can never
//! observe one half without the other. Storage failures are surfaced
//! to callers but never tear down the in-memory session.

use async_trait::async_trait;
use keyring::Entry;
use thiserror::Error;
use tokio::sync::Mutex;

use super::tokens::SessionRecord;

/// Keychain service name for the persisted session record
const KEYRING_SERVICE: &str = "gymlog";

/// Keychain account under which the single record lives
const KEYRING_ACCOUNT: &str = "session";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The record exists but cannot be decrypted or parsed.
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable key/value persistence for the session record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Persist the identity/token record as one atomic unit.
    async fn save(&self, record: &SessionRecord) -> Result<(), StorageError>;

    /// Load the persisted record. `None` is the normal logged-out
    /// condition, not an error.
    async fn load(&self) -> Result<Option<SessionRecord>, StorageError>;

    /// Delete the persisted record. Clearing an absent record succeeds.
    async fn clear(&self) -> Result<(), StorageError>;
}

/// Blocking keychain and filesystem work runs on tokio's blocking pool;
/// a lost task surfaces as `Unavailable`.
pub(crate) fn task_failed(err: tokio::task::JoinError) -> StorageError {
    StorageError::Unavailable(format!("storage task failed: {err}"))
}

// ============================================================================
// KeyringCredentialStore
// ============================================================================

/// OS-keychain store: the whole JSON record as one keychain entry.
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    /// Use a non-default keychain service name (one per app flavor).
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn save(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let json = serde_json::to_string(record)?;
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            Entry::new(&service, KEYRING_ACCOUNT)?.set_password(&json)?;
            Ok(())
        })
        .await
        .map_err(task_failed)?
    }

    async fn load(&self) -> Result<Option<SessionRecord>, StorageError> {
        let service = self.service.clone();
        let json = tokio::task::spawn_blocking(move || -> Result<Option<String>, StorageError> {
            match Entry::new(&service, KEYRING_ACCOUNT)?.get_password() {
                Ok(json) => Ok(Some(json)),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(StorageError::from(e)),
            }
        })
        .await
        .map_err(task_failed)??;

        match json {
            Some(json) => {
                let record = serde_json::from_str(&json)
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let service = self.service.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            match Entry::new(&service, KEYRING_ACCOUNT)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(task_failed)?
    }
}

// ============================================================================
// MemoryCredentialStore
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    record: Option<SessionRecord>,
    fail_saves: bool,
    fail_loads: bool,
    saves: usize,
    loads: usize,
    clears: usize,
}

/// In-memory store for tests: injectable failures and call counters.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `save` calls fail with `StorageError::Unavailable`.
    pub async fn fail_saves(&self, fail: bool) {
        self.inner.lock().await.fail_saves = fail;
    }

    /// Make subsequent `load` calls fail with `StorageError::Unavailable`.
    pub async fn fail_loads(&self, fail: bool) {
        self.inner.lock().await.fail_loads = fail;
    }

    pub async fn record(&self) -> Option<SessionRecord> {
        self.inner.lock().await.record.clone()
    }

    pub async fn saves(&self) -> usize {
        self.inner.lock().await.saves
    }

    pub async fn loads(&self) -> usize {
        self.inner.lock().await.loads
    }

    pub async fn clears(&self) -> usize {
        self.inner.lock().await.clears
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn save(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.saves += 1;
        if inner.fail_saves {
            return Err(StorageError::Unavailable("injected save failure".into()));
        }
        inner.record = Some(record.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<SessionRecord>, StorageError> {
        let mut inner = self.inner.lock().await;
        inner.loads += 1;
        if inner.fail_loads {
            return Err(StorageError::Unavailable("injected load failure".into()));
        }
        Ok(inner.record.clone())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.clears += 1;
        inner.record = None;
        Ok(())
    }
}
