//! Feature modules implementing the ingest API
//!
//! Each feature is a vertical slice exposing a `routes.rs`; the use cases
//! themselves live in [`crate::ingest`].
//!
//! # Features
//!
//! - **sips**: submission, upload, listing, review and failed downloads
//! - **monitor**: ticket request and WebSocket event stream
//! - **users**: uploader listing
//! - **sip_sources**: browsing the configured SIP source
//! - **batches**: batch submission, not implemented yet

pub mod batches;
pub mod monitor;
pub mod sip_sources;
pub mod sips;
pub mod users;

use axum::Router;

use crate::api::AppState;

/// Creates the ingest router with all feature routes mounted
///
/// - `/sips` - SIP operations
/// - `/monitor` - Event stream
/// - `/users` - Users
/// - `/sip-sources` - SIP source objects
/// - `/batches` - Batches
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/sips", sips::sips_routes())
        .nest("/monitor", monitor::monitor_routes())
        .nest("/users", users::users_routes())
        .nest("/sip-sources", sip_sources::sip_sources_routes())
        .nest("/batches", batches::batches_routes())
}
