//! Request authentication
//!
//! [`CurrentUser`] verifies the bearer token of API calls; [`Ticket`] reads
//! the single-use ticket that authenticates monitor and download calls.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::debug;

use crate::api::AppState;
use crate::auth::{Claims, TokenVerifier};
use crate::ingest::{self, IngestError};

/// Cookie carrying the ticket issued by the monitor and download requests.
pub const TICKET_COOKIE: &str = "sipflow-ticket";

#[derive(Clone)]
pub struct Authenticator {
    enabled: bool,
    verifier: Arc<dyn TokenVerifier>,
}

impl Authenticator {
    pub fn new(verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            enabled: true,
            verifier,
        }
    }

    /// Accepts every request without claims.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            verifier: Arc::new(crate::auth::NoopTokenVerifier),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Option<Claims>, IngestError> {
        if !self.enabled {
            return Ok(None);
        }
        let token = bearer_token(headers).ok_or(IngestError::Unauthorized)?;
        self.verifier.verify(token).await.map_err(|e| {
            debug!(error = %e, "Token rejected");
            IngestError::Unauthorized
        })
    }
}

/// Claims of the caller; `None` when authentication is disabled.
#[derive(Debug, Clone, Default)]
pub struct CurrentUser(pub Option<Claims>);

impl CurrentUser {
    pub fn claims(&self) -> Option<&Claims> {
        self.0.as_ref()
    }

    pub fn require(&self, attributes: &[&str]) -> Result<(), IngestError> {
        ingest::authorize(self.claims(), attributes)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = IngestError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        state
            .authenticator
            .authenticate(&parts.headers)
            .await
            .map(CurrentUser)
    }
}

/// Ticket from the [`TICKET_COOKIE`] cookie, empty when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ticket(pub String);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Ticket {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Ticket(ticket_cookie(&parts.headers).unwrap_or_default()))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn ticket_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TICKET_COOKIE)
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value handing `ticket` to the client.
pub fn ticket_set_cookie(ticket: &str) -> String {
    format!("{TICKET_COOKIE}={ticket}; Path=/ingest; HttpOnly; SameSite=Strict")
}
