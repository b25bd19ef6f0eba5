use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::api::{response::ApiResponse, AppState};
use crate::ingest::batches::AddBatchCommand;
use crate::ingest::IngestError;
use crate::middleware::CurrentUser;

pub fn batches_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(add_batch))
        .route("/", get(list_batches))
        .route("/:uuid", get(show_batch))
}

async fn add_batch(
    State(state): State<AppState>,
    _user: CurrentUser,
    Json(command): Json<AddBatchCommand>,
) -> Result<Response, IngestError> {
    let batch = state.ingest.add_batch(command).await?;
    Ok(ApiResponse::created(batch))
}

async fn list_batches(
    State(state): State<AppState>,
    _user: CurrentUser,
) -> Result<Response, IngestError> {
    let batches = state.ingest.list_batches().await?;
    Ok(ApiResponse::success(batches).into_response())
}

async fn show_batch(
    State(state): State<AppState>,
    _user: CurrentUser,
    Path(uuid): Path<String>,
) -> Result<Response, IngestError> {
    let batch = state.ingest.show_batch(&uuid).await?;
    Ok(ApiResponse::success(batch).into_response())
}
