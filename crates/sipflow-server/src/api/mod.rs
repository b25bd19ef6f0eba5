//! HTTP surface
//!
//! [`create_router`] mounts every feature under `/ingest` plus `/health`.

pub mod response;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

use crate::config::CorsConfig;
use crate::features;
use crate::ingest::IngestService;
use crate::middleware::{self, Authenticator};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestService,
    pub authenticator: Authenticator,
    pub pool: SqlitePool,
    /// Cancelled on shutdown; long lived streams derive their tokens from it.
    pub shutdown: CancellationToken,
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/ingest", features::router())
        .with_state(state)
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}

/// Liveness probe; reports unhealthy when the database stops answering.
async fn health_check(State(state): State<AppState>) -> Response {
    let database = sqlx::query("SELECT 1").fetch_one(&state.pool).await;
    if let Err(e) = database {
        tracing::error!(error = %e, "Health check failed");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unhealthy", "database": "unreachable"})),
        )
            .into_response();
    }

    Json(json!({"status": "healthy", "database": "connected"})).into_response()
}
