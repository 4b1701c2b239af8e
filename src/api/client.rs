//! API client for the gymlog backend.
//!
//! This module provides the `ApiClient` struct for making requests to
//! the backend: credential exchange, profile management, avatar upload,
//! and exercise history.
//!
//! Authenticated requests carry `Authorization: Bearer <access token>`
//! from the live token cell. A 401 is not propagated immediately: the
//! request hands control to the refresh coordinator and, on success,
//! retries itself exactly once with the rotated access token.

use std::sync::Arc;

use reqwest::{multipart, Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::refresh::RefreshCoordinator;
use crate::auth::tokens::TokenCell;
use crate::config::ClientConfig;
use crate::models::{HistoryDay, ProfileUpdate, User};

use super::ApiError;

/// Multipart field name the backend expects for avatar uploads
const AVATAR_FIELD: &str = "avatar";

/// Wire shape of a successful credential exchange.
#[derive(Debug, Deserialize)]
pub(crate) struct SignInResponse {
    pub user: User,
    pub token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateAccountRequest<'a> {
    name: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct AvatarResponse {
    avatar: String,
}

/// API client for the gymlog backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    tokens: TokenCell,
    refresh: Arc<RefreshCoordinator>,
}

impl ApiClient {
    pub(crate) fn new(
        http: Client,
        config: &ClientConfig,
        tokens: TokenCell,
        refresh: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            tokens,
            refresh,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Resolve the public URL of an uploaded avatar reference.
    pub fn avatar_url(&self, avatar: &str) -> String {
        format!("{}/avatar/{}", self.base_url, avatar)
    }

    // ===== Unauthenticated endpoints =====

    /// Exchange credentials for an identity and token pair.
    pub(crate) async fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SignInResponse, ApiError> {
        let response = self
            .http
            .post(self.url("/sessions"))
            .json(&SignInRequest { email, password })
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    pub(crate) async fn create_account(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), ApiError> {
        let response = self
            .http
            .post(self.url("/users"))
            .json(&CreateAccountRequest {
                name,
                email,
                password,
            })
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    // ===== Authenticated endpoints =====

    /// Fetch the signed-in user's profile.
    pub async fn fetch_profile(&self) -> Result<User, ApiError> {
        let url = self.url("/users/profile");
        self.get_json(&url).await
    }

    pub(crate) async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), ApiError> {
        let url = self.url("/users");
        self.execute_authed(|http| Ok(http.put(&url).json(update)))
            .await?;
        Ok(())
    }

    /// Upload a new avatar; returns the server-side file reference.
    pub(crate) async fn upload_avatar(
        &self,
        bytes: Vec<u8>,
        mime: &str,
        user_name: &str,
    ) -> Result<String, ApiError> {
        // Filename the backend expects: user name plus the extension
        // taken from the mime subtype, lowercased.
        let extension = mime.rsplit('/').next().unwrap_or("jpg");
        let filename = format!("{}.{}", user_name, extension).to_lowercase();

        let url = self.url("/users/avatar");
        let mime = mime.to_string();
        let response = self
            .execute_authed(move |http| {
                let part = multipart::Part::bytes(bytes.clone())
                    .file_name(filename.clone())
                    .mime_str(&mime)
                    .map_err(|e| ApiError::InvalidResponse(format!("invalid mime type: {e}")))?;
                let form = multipart::Form::new().part(AVATAR_FIELD, part);
                Ok(http.patch(&url).multipart(form))
            })
            .await?;

        let parsed: AvatarResponse = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))?;
        Ok(parsed.avatar)
    }

    /// Fetch the day-grouped exercise history.
    pub async fn fetch_history(&self) -> Result<Vec<HistoryDay>, ApiError> {
        let url = self.url("/history");
        self.get_json(&url).await
    }

    // ===== Request plumbing =====

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.execute_authed(|http| Ok(http.get(url))).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// Send an authenticated request, refreshing and retrying once on a
    /// 401. The builder closure is invoked again for the retry so
    /// non-clonable bodies (multipart) can be rebuilt.
    async fn execute_authed<F>(&self, build: F) -> Result<reqwest::Response, ApiError>
    where
        F: Fn(&Client) -> Result<RequestBuilder, ApiError>,
    {
        let access = self
            .tokens
            .access_token()
            .await
            .ok_or(ApiError::AuthExpired)?;

        let response = build(&self.http)?.bearer_auth(&access).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check_response(response).await;
        }

        debug!("request unauthorized, attempting token refresh");
        let fresh = self
            .refresh
            .ensure_fresh(&access)
            .await
            .map_err(|_| ApiError::AuthExpired)?;

        let retry = build(&self.http)?
            .bearer_auth(&fresh.access_token)
            .send()
            .await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            // Fresh tokens and still rejected: the session is dead
            // server-side.
            warn!("retried request still unauthorized, tearing down session");
            self.refresh.force_sign_out_current().await;
            return Err(ApiError::AuthExpired);
        }
        Self::check_response(retry).await
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }
}
