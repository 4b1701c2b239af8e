//! Client configuration.
//!
//! Holds the backend location and the tuning knobs for the HTTP layer
//! and the token refresh exchange. The library installs no subscriber
//! and reads no environment; embedders construct a `ClientConfig` and
//! hand it to `SessionManager::new`.

/// Default backend base URL (local development server).
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3333";

/// HTTP request timeout in seconds.
/// 30s allows for slow mobile networks while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for transient refresh failures (timeouts, 5xx).
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_REFRESH_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds between refresh retries.
const INITIAL_REFRESH_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the backend, without a trailing slash.
    pub base_url: String,
    /// Timeout applied to every outbound request.
    pub request_timeout_secs: u64,
    /// Retry budget for transient failures of the refresh exchange.
    pub refresh_max_retries: u32,
    /// Starting backoff between refresh retries; doubles per attempt.
    pub refresh_backoff_ms: u64,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            refresh_max_retries: MAX_REFRESH_RETRIES,
            refresh_backoff_ms: INITIAL_REFRESH_BACKOFF_MS,
        }
    }
}
