use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::models::User;

/// Buffer time before expiry to trigger refresh (5 minutes)
const REFRESH_BUFFER_MINUTES: i64 = 5;

/// The access/refresh credential pair for the current session.
///
/// Never exposed through `SessionState`; only the session manager,
/// the API client, and the refresh coordinator see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry metadata when the backend provides it; `None` means the
    /// client learns about expiry only through a 401.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_expires_at: Option<DateTime<Utc>>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            access_expires_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.access_expires_at {
            Some(expiry) => Utc::now() > expiry,
            None => false,
        }
    }

    /// Check if the access token will expire soon and should be refreshed
    pub fn needs_refresh(&self) -> bool {
        match self.access_expires_at {
            Some(expiry) => Utc::now() > expiry - Duration::minutes(REFRESH_BUFFER_MINUTES),
            None => false,
        }
    }
}

/// The single persisted blob: identity and tokens as one atomic record.
///
/// Absence of the record is the normal logged-out condition, not an
/// error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub user: User,
    pub tokens: TokenPair,
    pub saved_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(user: User, tokens: TokenPair) -> Self {
        Self {
            user,
            tokens,
            saved_at: Utc::now(),
        }
    }
}

/// Shared cell holding the live token pair.
///
/// Cloned into the API client and the refresh coordinator; readers take
/// immutable snapshots, writes go through the session manager's commit
/// paths.
#[derive(Debug, Clone, Default)]
pub(crate) struct TokenCell {
    inner: Arc<RwLock<Option<TokenPair>>>,
}

impl TokenCell {
    pub(crate) async fn get(&self) -> Option<TokenPair> {
        self.inner.read().await.clone()
    }

    pub(crate) async fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .await
            .as_ref()
            .map(|pair| pair.access_token.clone())
    }

    pub(crate) async fn set(&self, pair: TokenPair) {
        *self.inner.write().await = Some(pair);
    }

    pub(crate) async fn clear(&self) {
        *self.inner.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_without_expiry_never_reports_stale() {
        let pair = TokenPair::new("access", "refresh");
        assert!(!pair.is_expired());
        assert!(!pair.needs_refresh());
    }

    #[test]
    fn pair_past_expiry_is_stale() {
        let pair = TokenPair {
            access_expires_at: Some(Utc::now() - Duration::minutes(1)),
            ..TokenPair::new("access", "refresh")
        };
        assert!(pair.is_expired());
        assert!(pair.needs_refresh());
    }

    #[test]
    fn pair_inside_buffer_needs_refresh_but_is_not_expired() {
        let pair = TokenPair {
            access_expires_at: Some(Utc::now() + Duration::minutes(2)),
            ..TokenPair::new("access", "refresh")
        };
        assert!(!pair.is_expired());
        assert!(pair.needs_refresh());
    }

    #[tokio::test]
    async fn cell_snapshots_are_independent() {
        let cell = TokenCell::default();
        assert!(cell.get().await.is_none());

        cell.set(TokenPair::new("a1", "r1")).await;
        let snapshot = cell.get().await.unwrap();

        cell.set(TokenPair::new("a2", "r2")).await;
        assert_eq!(snapshot.access_token, "a1");
        assert_eq!(cell.access_token().await.as_deref(), Some("a2"));

        cell.clear().await;
        assert!(cell.get().await.is_none());
    }
}
