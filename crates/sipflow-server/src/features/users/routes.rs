use axum::{
    extract::{Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::api::{response::ApiResponse, AppState};
use crate::auth;
use crate::ingest::queries::ListUsersQuery;
use crate::ingest::IngestError;
use crate::middleware::CurrentUser;

pub fn users_routes() -> Router<AppState> {
    Router::new().route("/", get(list_users))
}

#[tracing::instrument(skip(state, user))]
async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Response, IngestError> {
    user.require(&[auth::USERS_LIST])?;

    let page = query.handle(&state.ingest).await?;
    Ok(ApiResponse::paged(page.items, page.page).into_response())
}
