use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::api::{response::ApiResponse, AppState};
use crate::auth;
use crate::ingest::queries::ListSipSourceObjectsQuery;
use crate::ingest::IngestError;
use crate::middleware::CurrentUser;

pub fn sip_sources_routes() -> Router<AppState> {
    Router::new().route("/:uuid/objects", get(list_sip_source_objects))
}

#[tracing::instrument(skip(state, user))]
async fn list_sip_source_objects(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(uuid): Path<String>,
    Query(query): Query<ListSipSourceObjectsQuery>,
) -> Result<Response, IngestError> {
    user.require(&[auth::SIPSOURCES_OBJECTS_LIST])?;

    let page = query.handle(&state.ingest, &uuid).await?;

    tracing::debug!(
        objects = page.objects.len(),
        more = page.next_token.is_some(),
        "Listed SIP source objects"
    );

    Ok(ApiResponse::success(page).into_response())
}
