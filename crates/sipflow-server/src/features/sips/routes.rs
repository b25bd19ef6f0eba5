use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::api::{response::ApiResponse, AppState};
use crate::auth;
use crate::ingest::commands::{ConfirmSipCommand, RejectSipCommand, SubmitSipCommand};
use crate::ingest::queries::ListSipsQuery;
use crate::ingest::IngestError;
use crate::middleware::{ticket_set_cookie, CurrentUser, Ticket};

pub fn sips_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(submit_sip))
        .route("/", get(list_sips))
        .route("/upload", post(upload_sip))
        .route("/:uuid", get(show_sip))
        .route("/:uuid/workflows", get(list_sip_workflows))
        .route("/:uuid/confirm", post(confirm_sip))
        .route("/:uuid/reject", post(reject_sip))
        .route("/:uuid/download", post(download_sip_request))
        .route("/:uuid/download", get(download_sip))
}

#[tracing::instrument(skip(state, user, command), fields(key = %command.key))]
async fn submit_sip(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(command): Json<SubmitSipCommand>,
) -> Result<Response, IngestError> {
    user.require(&[auth::SIPS_UPLOAD])?;

    let response = command.handle(&state.ingest, user.claims()).await?;

    tracing::info!(sip_uuid = %response.uuid, "SIP submitted via API");

    Ok(ApiResponse::created(response))
}

#[tracing::instrument(skip(state, user))]
async fn list_sips(
    State(state): State<AppState>,
    user: CurrentUser,
    Query(query): Query<ListSipsQuery>,
) -> Result<Response, IngestError> {
    user.require(&[auth::SIPS_LIST])?;

    let page = query.handle(&state.ingest).await?;
    Ok(ApiResponse::paged(page.items, page.page).into_response())
}

#[tracing::instrument(skip(state, user, headers, body))]
async fn upload_sip(
    State(state): State<AppState>,
    user: CurrentUser,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, IngestError> {
    user.require(&[auth::SIPS_UPLOAD])?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let response = state
        .ingest
        .upload(user.claims(), content_type, body.into_data_stream())
        .await?;

    tracing::info!(sip_uuid = %response.uuid, "SIP uploaded via API");

    Ok(ApiResponse::created(response))
}

#[tracing::instrument(skip(state, user))]
async fn show_sip(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(uuid): Path<String>,
) -> Result<Response, IngestError> {
    user.require(&[auth::SIPS_READ])?;

    let sip = state.ingest.show_sip(&uuid).await?;
    Ok(ApiResponse::success(sip).into_response())
}

#[tracing::instrument(skip(state, user))]
async fn list_sip_workflows(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(uuid): Path<String>,
) -> Result<Response, IngestError> {
    user.require(&[auth::SIPS_WORKFLOWS_LIST])?;

    let workflows = state.ingest.list_sip_workflows(&uuid).await?;
    Ok(ApiResponse::success(workflows).into_response())
}

#[tracing::instrument(skip(state, user, command))]
async fn confirm_sip(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(uuid): Path<String>,
    Json(command): Json<ConfirmSipCommand>,
) -> Result<Response, IngestError> {
    user.require(&[auth::SIPS_REVIEW])?;

    command.handle(&state.ingest, &uuid).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

#[tracing::instrument(skip(state, user))]
async fn reject_sip(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(uuid): Path<String>,
) -> Result<Response, IngestError> {
    user.require(&[auth::SIPS_REVIEW])?;

    RejectSipCommand.handle(&state.ingest, &uuid).await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

#[tracing::instrument(skip(state, user))]
async fn download_sip_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(uuid): Path<String>,
) -> Result<Response, IngestError> {
    user.require(&[auth::SIPS_DOWNLOAD])?;

    let response = state
        .ingest
        .download_failed_request(user.claims(), &uuid)
        .await?;

    let cookie = match response.ticket.as_deref() {
        Some(ticket) => Some(
            HeaderValue::from_str(&ticket_set_cookie(ticket))
                .map_err(|_| IngestError::internal("ticket request failed"))?,
        ),
        None => None,
    };

    let mut res = ApiResponse::success(response).into_response();
    if let Some(cookie) = cookie {
        res.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    Ok(res)
}

#[tracing::instrument(skip(state, ticket))]
async fn download_sip(
    State(state): State<AppState>,
    Ticket(ticket): Ticket,
    Path(uuid): Path<String>,
) -> Result<Response, IngestError> {
    let (meta, stream) = state.ingest.download_failed(&ticket, &uuid).await?;

    let headers = [
        (header::CONTENT_TYPE, meta.content_type),
        (header::CONTENT_LENGTH, meta.content_length.to_string()),
        (header::CONTENT_DISPOSITION, meta.content_disposition),
    ];
    Ok((headers, Body::from_stream(stream)).into_response())
}
