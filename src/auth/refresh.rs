//! Token refresh coordination.
//!
//! Multiple screens can race into 401s at nearly the same moment after
//! the access token silently expires. The coordinator collapses that
//! burst into a single backend exchange: the in-flight operation is
//! held as a shared future, concurrent callers await the same instance,
//! and every waiter observes the same rotated pair or the same failure.
//!
//! A sign-out preempts an in-flight exchange through the session
//! generation: waiters resolve to `Cancelled` immediately and a late
//! network response is discarded rather than reviving the session.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::ApiError;
use crate::auth::session::SessionShared;
use crate::auth::tokens::TokenPair;
use crate::config::ClientConfig;

/// Refresh exchange endpoint, relative to the base URL.
const REFRESH_PATH: &str = "/sessions/refresh-token";

/// Why a refresh attempt did not produce a usable pair.
///
/// Clone because every waiter on the shared exchange future receives
/// the same instance.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum RefreshError {
    /// The backend rejected the refresh token itself. Terminal; the
    /// session has been torn down.
    #[error("refresh token rejected: {0}")]
    Rejected(String),

    /// Transport failures or 5xx responses exhausted the retry budget.
    #[error("refresh exchange failed: {0}")]
    Network(String),

    /// The session was torn down while the exchange was in flight.
    #[error("refresh cancelled by sign-out")]
    Cancelled,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    token: String,
    /// Absent when the backend does not rotate the refresh token; the
    /// old one stays valid.
    #[serde(default)]
    refresh_token: Option<String>,
}

type SharedExchange = Shared<BoxFuture<'static, Result<TokenPair, RefreshError>>>;

pub(crate) struct RefreshCoordinator {
    http: Client,
    refresh_url: String,
    shared: Arc<SessionShared>,
    max_retries: u32,
    initial_backoff_ms: u64,
    /// Behind an `Arc` so the driver task can release the slot after
    /// the exchange settles.
    in_flight: Arc<Mutex<Option<SharedExchange>>>,
}

impl RefreshCoordinator {
    pub(crate) fn new(http: Client, config: &ClientConfig, shared: Arc<SessionShared>) -> Self {
        Self {
            http,
            refresh_url: format!(
                "{}{REFRESH_PATH}",
                config.base_url.trim_end_matches('/')
            ),
            shared,
            max_retries: config.refresh_max_retries,
            initial_backoff_ms: config.refresh_backoff_ms,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    /// Return a pair whose access token differs from `stale_access`,
    /// issuing at most one backend exchange per burst of callers.
    pub(crate) async fn ensure_fresh(
        &self,
        stale_access: &str,
    ) -> Result<TokenPair, RefreshError> {
        // Fast path: another caller already rotated the pair.
        if let Some(current) = self.shared.tokens.get().await {
            if current.access_token != stale_access {
                return Ok(current);
            }
        }

        let exchange = {
            let mut slot = self.in_flight.lock().await;
            // Re-check under the lock: rotation may have landed while
            // we waited for it.
            if let Some(current) = self.shared.tokens.get().await {
                if current.access_token != stale_access {
                    return Ok(current);
                }
            }
            match slot.as_ref() {
                Some(exchange) => {
                    debug!("joining in-flight token refresh");
                    exchange.clone()
                }
                None => {
                    let exchange = Self::exchange(
                        Arc::clone(&self.shared),
                        self.http.clone(),
                        self.refresh_url.clone(),
                        self.max_retries,
                        self.initial_backoff_ms,
                    )
                    .boxed()
                    .shared();
                    *slot = Some(exchange.clone());

                    // Drive the exchange to completion even if every
                    // waiter is dropped, then release the slot so the
                    // next burst starts a new exchange.
                    let slot_handle = Arc::clone(&self.in_flight);
                    let driver = exchange.clone();
                    tokio::spawn(async move {
                        let _ = driver.await;
                        slot_handle.lock().await.take();
                    });
                    exchange
                }
            }
        };

        exchange.await
    }

    /// Tear down the current session; used by the API client when a
    /// retried request is still unauthorized with fresh tokens.
    pub(crate) async fn force_sign_out_current(&self) {
        self.shared.force_sign_out(self.shared.generation()).await;
    }

    /// The single exchange task for one burst.
    async fn exchange(
        shared: Arc<SessionShared>,
        http: Client,
        url: String,
        max_retries: u32,
        initial_backoff_ms: u64,
    ) -> Result<TokenPair, RefreshError> {
        let Some(pair) = shared.tokens.get().await else {
            // Signed out between the 401 and this task starting.
            return Err(RefreshError::Cancelled);
        };
        let refresh_token = pair.refresh_token;
        let started_gen = shared.generation();
        let mut generation = shared.subscribe_generation();

        let mut retries = 0u32;
        let mut backoff_ms = initial_backoff_ms;

        loop {
            let request = http
                .post(&url)
                .json(&RefreshRequest {
                    refresh_token: &refresh_token,
                })
                .send();

            let outcome = tokio::select! {
                _ = generation.changed() => {
                    debug!("token refresh cancelled by sign-out");
                    return Err(RefreshError::Cancelled);
                }
                outcome = request => outcome,
            };

            let transient = match outcome {
                Ok(response) if response.status().is_success() => {
                    let parsed: RefreshResponse = match response.json().await {
                        Ok(parsed) => parsed,
                        Err(err) => {
                            warn!(error = %err, "refresh response unreadable, tearing down session");
                            shared.force_sign_out(started_gen).await;
                            return Err(RefreshError::Network(format!(
                                "invalid refresh response: {err}"
                            )));
                        }
                    };
                    let rotated = TokenPair::new(
                        parsed.token,
                        parsed.refresh_token.unwrap_or(refresh_token),
                    );
                    if !shared.commit_refreshed(started_gen, rotated.clone()).await {
                        return Err(RefreshError::Cancelled);
                    }
                    debug!("access token rotated");
                    return Ok(rotated);
                }
                Ok(response) if response.status().is_client_error() => {
                    // The refresh token itself is invalid. Terminal: no
                    // retry can fix it.
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let message = match ApiError::from_status(status, &body) {
                        ApiError::Http { message, .. } => message,
                        other => other.to_string(),
                    };
                    warn!(status = status.as_u16(), message = %message, "refresh token rejected, signing out");
                    shared.force_sign_out(started_gen).await;
                    return Err(RefreshError::Rejected(message));
                }
                Ok(response) => format!("server error ({})", response.status().as_u16()),
                Err(err) => err.to_string(),
            };

            retries += 1;
            if retries > max_retries {
                warn!(error = %transient, "refresh retry budget exhausted, signing out");
                shared.force_sign_out(started_gen).await;
                return Err(RefreshError::Network(transient));
            }
            warn!(
                error = %transient,
                retry = retries,
                backoff_ms,
                "transient refresh failure, backing off"
            );
            tokio::select! {
                _ = generation.changed() => {
                    debug!("token refresh cancelled during backoff");
                    return Err(RefreshError::Cancelled);
                }
                _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
            }
            backoff_ms *= 2; // Exponential backoff
        }
    }
}
