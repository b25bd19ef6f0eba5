//! OIDC client-credentials token provider and bearer client
//!
//! [`OidcTokenProvider`] caches one access token and refreshes it when it is
//! missing or about to expire. The cache lock is held across the refresh so
//! concurrent callers wait for a single token request instead of each
//! hitting the token endpoint.
//!
//! Transient failures (5xx responses, network errors, responses without an
//! access token) are retried with exponential backoff. 4xx responses and
//! cancellation end the refresh immediately.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_TOKEN_EXPIRY_LEEWAY: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_MAX_ATTEMPTS: i64 = 3;
pub const DEFAULT_RETRY_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RETRY_MAX_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_BACKOFF_COEFFICIENT: f64 = 2.0;

const DISCOVERY_PATH: &str = ".well-known/openid-configuration";

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("cannot fetch token: {status}")]
    Http { status: StatusCode, body: String },

    #[error("cannot fetch token: {0}")]
    Transport(String),

    #[error("context canceled")]
    Cancelled,

    #[error("server response missing access_token")]
    MissingAccessToken,

    #[error("discover OIDC provider: {0}")]
    Discovery(String),

    #[error("missing OIDC token endpoint URL")]
    MissingTokenUrl,

    #[error("request OIDC token: {0}")]
    Request(Box<TokenError>),
}

impl TokenError {
    fn is_retryable(&self) -> bool {
        match self {
            TokenError::Http { status, .. } => status.is_server_error(),
            TokenError::Transport(_) | TokenError::MissingAccessToken => true,
            _ => false,
        }
    }
}

/// Storage API OIDC settings as read from configuration.
///
/// Durations are kept signed so invalid values can be reported.
#[derive(Debug, Clone, PartialEq)]
pub struct OidcConfig {
    pub enabled: bool,
    pub provider_url: Option<String>,
    pub token_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    pub audience: Option<String>,
    pub token_expiry_leeway_secs: i64,
    pub retry_max_attempts: i64,
    pub retry_initial_interval_ms: i64,
    pub retry_max_interval_ms: i64,
    pub retry_backoff_coefficient: f64,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider_url: None,
            token_url: None,
            client_id: None,
            client_secret: None,
            scopes: Vec::new(),
            audience: None,
            token_expiry_leeway_secs: DEFAULT_TOKEN_EXPIRY_LEEWAY.as_secs() as i64,
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            retry_initial_interval_ms: DEFAULT_RETRY_INITIAL_INTERVAL.as_millis() as i64,
            retry_max_interval_ms: DEFAULT_RETRY_MAX_INTERVAL.as_millis() as i64,
            retry_backoff_coefficient: DEFAULT_RETRY_BACKOFF_COEFFICIENT,
        }
    }
}

impl OidcConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errs = Vec::new();
        if !self.enabled {
            return errs;
        }
        if self.provider_url.is_none() && self.token_url.is_none() {
            errs.push("missing OIDC providerURL or tokenURL with storage OIDC auth. enabled".into());
        }
        if self.client_id.is_none() || self.client_secret.is_none() {
            errs.push("missing OIDC client credentials with storage OIDC auth. enabled".into());
        }
        if self.token_expiry_leeway_secs < 0 {
            errs.push("invalid storage OIDC token expiry leeway, value must be >= 0".into());
        }
        if self.retry_max_attempts < 0 {
            errs.push("invalid storage OIDC retry max attempts, value must be >= 0".into());
        }
        if self.retry_initial_interval_ms < 0 {
            errs.push("invalid storage OIDC retry initial interval, value must be >= 0".into());
        }
        if self.retry_max_interval_ms < 0 {
            errs.push("invalid storage OIDC retry max interval, value must be >= 0".into());
        } else if self.retry_max_interval_ms < self.retry_initial_interval_ms {
            errs.push(
                "invalid storage OIDC retry max interval, value must be >= initial interval".into(),
            );
        }
        if self.retry_backoff_coefficient < 1.0 {
            errs.push("invalid storage OIDC retry backoff coefficient, value must be >= 1".into());
        }
        errs
    }
}

fn non_negative_ms(ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub backoff_coefficient: f64,
}

impl RetryPolicy {
    /// Wait before the retry following `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if self.initial_interval.is_zero() {
            return Duration::ZERO;
        }
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let wait = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exp);
        let wait = if self.max_interval.is_zero() {
            wait
        } else {
            wait.min(self.max_interval.as_secs_f64())
        };
        Duration::try_from_secs_f64(wait).unwrap_or(self.max_interval)
    }
}

impl From<&OidcConfig> for RetryPolicy {
    fn from(config: &OidcConfig) -> Self {
        Self {
            max_attempts: u32::try_from(config.retry_max_attempts.max(1)).unwrap_or(u32::MAX),
            initial_interval: non_negative_ms(config.retry_initial_interval_ms),
            max_interval: non_negative_ms(config.retry_max_interval_ms),
            backoff_coefficient: config.retry_backoff_coefficient.max(1.0),
        }
    }
}

#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self, cancel: &CancellationToken) -> Result<String, TokenError>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expiry: Option<Instant>,
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct Discovery {
    token_endpoint: Option<String>,
}

pub struct OidcTokenProvider {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    audience: Option<String>,
    leeway: Duration,
    retry: RetryPolicy,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for OidcTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcTokenProvider")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("leeway", &self.leeway)
            .field("retry", &self.retry)
            .finish()
    }
}

impl OidcTokenProvider {
    /// Build a provider, discovering the token endpoint when only a provider
    /// URL is configured.
    pub async fn new(client: Client, config: &OidcConfig) -> Result<Self, TokenError> {
        let token_url = match (&config.token_url, &config.provider_url) {
            (Some(url), _) => url.clone(),
            (None, Some(provider)) => discover(&client, provider).await?,
            (None, None) => return Err(TokenError::MissingTokenUrl),
        };

        Ok(Self {
            client,
            token_url,
            client_id: config.client_id.clone().unwrap_or_default(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
            scopes: config.scopes.clone(),
            audience: config.audience.clone(),
            leeway: Duration::from_secs(u64::try_from(config.token_expiry_leeway_secs).unwrap_or(0)),
            retry: RetryPolicy::from(config),
            token: Mutex::new(None),
        })
    }

    fn needs_refresh(&self, token: Option<&CachedToken>) -> bool {
        match token {
            None => true,
            Some(t) if t.access_token.is_empty() => true,
            Some(CachedToken { expiry: None, .. }) => false,
            Some(CachedToken {
                expiry: Some(expiry),
                ..
            }) => *expiry <= Instant::now() + self.leeway,
        }
    }

    async fn fetch(&self) -> Result<CachedToken, TokenError> {
        let mut form: Vec<(&str, String)> = vec![("grant_type", "client_credentials".into())];
        if !self.scopes.is_empty() {
            form.push(("scope", self.scopes.join(" ")));
        }
        if let Some(audience) = &self.audience {
            form.push(("audience", audience.clone()));
        }

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::Http { status, body });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Transport(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(TokenError::MissingAccessToken);
        }

        Ok(CachedToken {
            access_token: token.access_token,
            expiry: token
                .expires_in
                .filter(|secs| *secs > 0)
                .map(|secs| Instant::now() + Duration::from_secs(secs)),
        })
    }

    async fn request_token(&self, cancel: &CancellationToken) -> Result<CachedToken, TokenError> {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TokenError::Cancelled),
                result = self.fetch() => result,
            };

            let err = match result {
                Ok(token) => return Ok(token),
                Err(err) => err,
            };
            if !err.is_retryable() || attempt >= self.retry.max_attempts {
                return Err(err);
            }

            let wait = self.retry.backoff(attempt);
            warn!(attempt, error = %err, ?wait, "OIDC token request failed, retrying");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TokenError::Cancelled),
                _ = tokio::time::sleep(wait) => {},
            }
            attempt += 1;
        }
    }
}

async fn discover(client: &Client, provider_url: &str) -> Result<String, TokenError> {
    let url = format!("{}/{DISCOVERY_PATH}", provider_url.trim_end_matches('/'));
    let response = client
        .get(&url)
        .send()
        .await
        .and_then(Response::error_for_status)
        .map_err(|e| TokenError::Discovery(e.to_string()))?;
    let discovery: Discovery = response
        .json()
        .await
        .map_err(|e| TokenError::Discovery(e.to_string()))?;
    discovery
        .token_endpoint
        .filter(|url| !url.is_empty())
        .ok_or(TokenError::MissingTokenUrl)
}

#[async_trait]
impl AccessTokenProvider for OidcTokenProvider {
    async fn access_token(&self, cancel: &CancellationToken) -> Result<String, TokenError> {
        let mut cached = self.token.lock().await;
        if self.needs_refresh(cached.as_ref()) {
            let token = self
                .request_token(cancel)
                .await
                .map_err(|e| TokenError::Request(Box::new(e)))?;
            debug!(expires = token.expiry.is_some(), "Refreshed OIDC access token");
            *cached = Some(token);
        }
        cached
            .as_ref()
            .map(|t| t.access_token.clone())
            .ok_or(TokenError::MissingAccessToken)
    }
}

#[derive(Error, Debug)]
pub enum BearerError {
    #[error("get storage API access token: {0}")]
    Token(#[from] TokenError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("request canceled")]
    Cancelled,
}

/// HTTP client that authenticates every request with a bearer token.
///
/// Without a token provider requests are sent unchanged.
#[derive(Clone)]
pub struct BearerClient {
    client: Client,
    provider: Option<Arc<dyn AccessTokenProvider>>,
}

impl BearerClient {
    pub fn new(client: Client, provider: Option<Arc<dyn AccessTokenProvider>>) -> Self {
        Self { client, provider }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send `request`; `cancel` covers both the token refresh and the request.
    pub async fn send(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<Response, BearerError> {
        let request = match &self.provider {
            Some(provider) => request.bearer_auth(provider.access_token(cancel).await?),
            None => request,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BearerError::Cancelled),
            response = request.send() => Ok(response?),
        }
    }
}
