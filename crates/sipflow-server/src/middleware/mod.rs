//! HTTP middleware for the ingest API
//!
//! CORS and request tracing layers live here; the authentication extractors
//! are in [`auth`].

use axum::http::{header, HeaderName, HeaderValue, Method};
use std::time::Duration;
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
    LatencyUnit,
};
use tracing::{warn, Level};

use crate::config::CorsConfig;

pub mod auth;

pub use auth::{ticket_set_cookie, Authenticator, CurrentUser, Ticket, TICKET_COOKIE};

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(3600);

const ALLOWED_HEADERS: [HeaderName; 6] = [
    header::ACCEPT,
    header::ACCEPT_LANGUAGE,
    header::AUTHORIZATION,
    header::CONTENT_LANGUAGE,
    header::CONTENT_TYPE,
    header::COOKIE,
];

fn is_wildcard(config: &CorsConfig) -> bool {
    config.allowed_origins.is_empty() || config.allowed_origins.iter().any(|o| o == "*")
}

fn allowed_origins(config: &CorsConfig) -> AllowOrigin {
    if is_wildcard(config) {
        return AllowOrigin::any();
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            },
        })
        .collect();
    AllowOrigin::list(origins)
}

/// CORS layer for the configured origins
///
/// Credentials are only allowed with an explicit origin list; a wildcard
/// origin never sends `Access-Control-Allow-Credentials`.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(ALLOWED_HEADERS)
        .allow_origin(allowed_origins(config))
        .allow_credentials(config.allow_credentials && !is_wildcard(config))
        .max_age(PREFLIGHT_MAX_AGE)
}

/// Request span and response logging
pub fn tracing_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    let on_response = DefaultOnResponse::new()
        .level(Level::INFO)
        .latency_unit(LatencyUnit::Millis);

    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(on_response)
}
