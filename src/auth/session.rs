//! Session state machine and its public surface.
//!
//! The session manager owns the authoritative identity/token state and
//! serializes every transition through a single mutation lock. State is
//! republished to subscribers over a `watch` channel only after a
//! transition is fully committed (persist first, then publish); tokens
//! never appear in the published value.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError};
use crate::auth::refresh::RefreshCoordinator;
use crate::auth::store::{CredentialStore, StorageError};
use crate::auth::tokens::{SessionRecord, TokenCell, TokenPair};
use crate::config::ClientConfig;
use crate::models::{ProfileUpdate, User};

/// The process-wide session state.
///
/// `Bootstrapping` is the only initial state; the navigation root must
/// not mount either route tree until the state has left it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Persisted credentials have not been loaded yet.
    Bootstrapping,
    /// No valid identity.
    Unauthenticated,
    /// A signed-in user. Tokens exist alongside but are never published.
    Authenticated { user: User },
}

impl SessionState {
    pub fn is_bootstrapping(&self) -> bool {
        matches!(self, SessionState::Bootstrapping)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::Authenticated { user } => Some(user),
            _ => None,
        }
    }
}

/// The closed error set operations surface to the UI layer.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The backend rejected the submitted credentials or fields; carries
    /// the backend's own message for display.
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("network error: {0}")]
    Network(String),

    /// Credentials expired and could not be refreshed; the session has
    /// already been torn down.
    #[error("authentication expired")]
    AuthExpired,

    /// An operation requiring a session was invoked without one. A
    /// usage error in the calling screen, not a runtime condition.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Persistence failed; the in-memory session is still authoritative
    /// but restore on next boot may not work.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::AuthExpired => SessionError::AuthExpired,
            ApiError::Http { status, message } if (400..500).contains(&status) => {
                SessionError::InvalidCredentials(message)
            }
            ApiError::Http { status, message } => {
                SessionError::Network(format!("server error ({status}): {message}"))
            }
            ApiError::Network(e) => SessionError::Network(e.to_string()),
            ApiError::InvalidResponse(msg) => SessionError::Network(msg),
        }
    }
}

/// State shared between the manager, the API client, and the refresh
/// coordinator.
///
/// The generation counter orders sessions: it is bumped on every
/// sign-in and sign-out, and commit paths that raced the bump abort
/// instead of reviving a torn-down session.
pub(crate) struct SessionShared {
    pub(crate) tokens: TokenCell,
    state: watch::Sender<SessionState>,
    store: Arc<dyn CredentialStore>,
    mutation: Mutex<()>,
    generation: watch::Sender<u64>,
}

impl SessionShared {
    fn new(store: Arc<dyn CredentialStore>) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Bootstrapping);
        let (generation, _) = watch::channel(0u64);
        Arc::new(Self {
            tokens: TokenCell::default(),
            state,
            store,
            mutation: Mutex::new(()),
            generation,
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    pub(crate) fn subscribe_generation(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn publish(&self, next: SessionState) {
        debug!(state = ?variant_name(&next), "session state committed");
        self.state.send_replace(next);
    }

    /// Commit a rotated token pair unless the session changed under the
    /// in-flight exchange. Returns false when the commit was abandoned.
    pub(crate) async fn commit_refreshed(&self, expected_gen: u64, pair: TokenPair) -> bool {
        let _guard = self.mutation.lock().await;
        if self.generation() != expected_gen {
            debug!("discarding refreshed tokens for a torn-down session");
            return false;
        }
        self.tokens.set(pair.clone()).await;
        if let SessionState::Authenticated { user } = self.snapshot() {
            if let Err(err) = self.store.save(&SessionRecord::new(user, pair)).await {
                warn!(error = %err, "failed to persist refreshed tokens");
            }
        }
        true
    }

    /// Tear the session down unless a newer one already replaced it.
    pub(crate) async fn force_sign_out(&self, expected_gen: u64) {
        let _guard = self.mutation.lock().await;
        if self.generation() != expected_gen {
            return;
        }
        if let Err(err) = self.sign_out_locked().await {
            warn!(error = %err, "failed to clear credential store during forced sign-out");
        }
    }

    /// Caller must hold the mutation lock.
    async fn sign_out_locked(&self) -> Result<(), StorageError> {
        self.generation.send_modify(|g| *g += 1);
        self.tokens.clear().await;
        let result = self.store.clear().await;
        self.publish(SessionState::Unauthenticated);
        result
    }
}

fn variant_name(state: &SessionState) -> &'static str {
    match state {
        SessionState::Bootstrapping => "bootstrapping",
        SessionState::Unauthenticated => "unauthenticated",
        SessionState::Authenticated { .. } => "authenticated",
    }
}

/// The single source of truth for the current session.
///
/// Clone is cheap; all clones share the same state.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<SessionShared>,
    api: ApiClient,
}

impl SessionManager {
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, SessionError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SessionError::Network(format!("failed to build HTTP client: {e}")))?;

        let shared = SessionShared::new(store);
        let refresh = Arc::new(RefreshCoordinator::new(
            http.clone(),
            &config,
            Arc::clone(&shared),
        ));
        let api = ApiClient::new(http, &config, shared.tokens.clone(), refresh);

        Ok(Self { shared, api })
    }

    // ===== Observer surface =====

    /// Subscribe to committed state transitions. The receiver always
    /// holds the latest snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.shared.snapshot()
    }

    /// Gates the navigation root's loading placeholder.
    pub fn is_bootstrapping(&self) -> bool {
        self.state().is_bootstrapping()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state().user().cloned()
    }

    /// The HTTP adapter, for consumers outside the session core (e.g.
    /// the history screen). Bearer attachment and 401 refresh are
    /// transparent.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    // ===== Operations =====

    /// Restore a persisted session, once, at process start.
    ///
    /// Idempotent: calling again after the state has left
    /// `Bootstrapping` is a no-op. A storage failure still moves the
    /// state to `Unauthenticated` so navigation is never wedged on the
    /// loading placeholder, and is then surfaced to the caller.
    pub async fn bootstrap(&self) -> Result<(), SessionError> {
        let _guard = self.shared.mutation.lock().await;
        if !self.shared.snapshot().is_bootstrapping() {
            debug!("bootstrap called after startup; ignoring");
            return Ok(());
        }

        match self.shared.store.load().await {
            Ok(Some(record)) => {
                if record.tokens.needs_refresh() {
                    debug!("restored tokens are near expiry; next 401 will rotate them");
                }
                self.shared.tokens.set(record.tokens).await;
                info!(user_id = %record.user.id, "session restored from storage");
                self.shared
                    .publish(SessionState::Authenticated { user: record.user });
                Ok(())
            }
            Ok(None) => {
                debug!("no persisted session");
                self.shared.publish(SessionState::Unauthenticated);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "failed to load persisted session");
                self.shared.publish(SessionState::Unauthenticated);
                Err(err.into())
            }
        }
    }

    /// Exchange credentials for a session.
    ///
    /// On success the record is persisted and the state moves to
    /// `Authenticated` before this returns. A persistence failure is
    /// tolerated (the session stands) but surfaced as
    /// `SessionError::Storage`.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User, SessionError> {
        let response = self.api.sign_in(email, password).await?;
        let user = response.user;
        let tokens = TokenPair::new(response.token, response.refresh_token);

        let _guard = self.shared.mutation.lock().await;
        self.shared.generation.send_modify(|g| *g += 1);
        self.shared.tokens.set(tokens.clone()).await;
        let saved = self
            .shared
            .store
            .save(&SessionRecord::new(user.clone(), tokens))
            .await;
        info!(user_id = %user.id, "signed in");
        self.shared
            .publish(SessionState::Authenticated { user: user.clone() });
        saved?;
        Ok(user)
    }

    /// Create an account, then sign in with the same credentials.
    pub async fn sign_up(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, SessionError> {
        self.api.create_account(name, email, password).await?;
        self.sign_in(email, password).await
    }

    /// Tear the session down.
    ///
    /// Safe from any state, including mid-refresh: the generation bump
    /// resolves outstanding refresh waiters with a failure and any late
    /// exchange response is discarded. A storage failure is surfaced
    /// but the state still transitions.
    pub async fn sign_out(&self) -> Result<(), SessionError> {
        let _guard = self.shared.mutation.lock().await;
        let result = self.shared.sign_out_locked().await;
        info!("signed out");
        Ok(result?)
    }

    /// Apply a partial profile edit.
    ///
    /// The merged identity is committed and persisted only after the
    /// backend accepts the update; on any failure the current identity
    /// is untouched. Requires `Authenticated`.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<User, SessionError> {
        if self.current_user().is_none() {
            return Err(SessionError::NotAuthenticated);
        }
        let generation = self.shared.generation();

        self.api.update_profile(&update).await?;

        self.commit_identity(generation, |user| user.merged_with(&update))
            .await
    }

    /// Upload a new avatar and merge the returned reference.
    ///
    /// All-or-nothing: an upload failure never commits a partial avatar
    /// reference. Requires `Authenticated`.
    pub async fn update_avatar(&self, bytes: Vec<u8>, mime: &str) -> Result<User, SessionError> {
        let user = self.current_user().ok_or(SessionError::NotAuthenticated)?;
        let generation = self.shared.generation();

        let avatar = self.api.upload_avatar(bytes, mime, &user.name).await?;

        self.commit_identity(generation, move |user| User {
            avatar: Some(avatar.clone()),
            ..user.clone()
        })
        .await
    }

    /// Commit an identity built from the current snapshot, unless a
    /// sign-out or re-sign-in landed while the backend call was in
    /// flight.
    async fn commit_identity(
        &self,
        expected_gen: u64,
        build: impl Fn(&User) -> User,
    ) -> Result<User, SessionError> {
        let _guard = self.shared.mutation.lock().await;
        if self.shared.generation() != expected_gen {
            debug!("session changed during profile operation; discarding result");
            return Err(SessionError::NotAuthenticated);
        }
        let current = self
            .shared
            .snapshot()
            .user()
            .cloned()
            .ok_or(SessionError::NotAuthenticated)?;

        let merged = build(&current);
        let saved = match self.shared.tokens.get().await {
            Some(pair) => {
                self.shared
                    .store
                    .save(&SessionRecord::new(merged.clone(), pair))
                    .await
            }
            None => Ok(()),
        };
        self.shared.publish(SessionState::Authenticated {
            user: merged.clone(),
        });
        saved?;
        Ok(merged)
    }
}
