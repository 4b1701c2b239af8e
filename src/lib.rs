//! Core session library for a gymlog fitness client.
//!
//! Implements the authenticated session lifecycle: establishing,
//! persisting, restoring, refreshing, and tearing down a user's
//! identity and token pair, and republishing that state to any number
//! of UI subscribers.
//!
//! Screens are thin consumers of this crate's surface: they read
//! [`SessionState`] through [`SessionManager::subscribe`] and invoke
//! the five session operations (`sign_in`, `sign_out`, `update_profile`,
//! `update_avatar`, `bootstrap`). Tokens never cross that boundary.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gymlog_core::{ClientConfig, FileCredentialStore, SessionManager, SessionState};
//!
//! # async fn example() -> Result<(), gymlog_core::SessionError> {
//! let store = Arc::new(FileCredentialStore::default_location()?);
//! let session = SessionManager::new(ClientConfig::new("https://api.example.com"), store)?;
//!
//! session.bootstrap().await?;
//! match session.state() {
//!     SessionState::Authenticated { user } => println!("welcome back, {}", user.name),
//!     _ => { session.sign_in("a@b.com", "secret1").await?; }
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{
    CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore,
    SessionError, SessionManager, SessionRecord, SessionState, StorageError, TokenPair,
};
pub use config::ClientConfig;
pub use models::{HistoryDay, HistoryEntry, ProfileUpdate, User};
