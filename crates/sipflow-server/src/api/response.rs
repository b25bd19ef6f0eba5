//! JSON envelope for successful responses
//!
//! Every handler answers `{"success": true, "data": ..., "meta"?: ...}`;
//! `meta` is only present on paged listings.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::persistence::Page;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Page>,
}

impl<T: Serialize> ApiResponse<T> {
    fn new(data: T, meta: Option<Page>) -> Self {
        Self {
            success: true,
            data,
            meta,
        }
    }

    pub fn success(data: T) -> Self {
        Self::new(data, None)
    }

    pub fn paged(data: T, page: Page) -> Self {
        Self::new(data, Some(page))
    }

    /// `201 Created` with `data` as payload.
    pub fn created(data: T) -> Response {
        Self::success(data).with_status(StatusCode::CREATED)
    }

    pub fn with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        self.with_status(StatusCode::OK)
    }
}
