//! Authentication module: the session lifecycle.
//!
//! This module provides:
//! - `SessionManager`: the state machine owning identity and tokens
//! - `CredentialStore`: durable persistence for the session record,
//!   with file-backed (sealed), OS-keychain, and in-memory backings
//! - the refresh coordinator that collapses concurrent 401 bursts into
//!   a single token exchange
//!
//! The persisted record survives process restarts; `bootstrap` restores
//! it once at startup.

pub mod file_store;
pub(crate) mod refresh;
pub mod session;
pub mod store;
pub mod tokens;

pub use file_store::FileCredentialStore;
pub use session::{SessionError, SessionManager, SessionState};
pub use store::{CredentialStore, KeyringCredentialStore, MemoryCredentialStore, StorageError};
pub use tokens::{SessionRecord, TokenPair};
